use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VehicleError};

/// A single vehicle record.
///
/// `last_modified` is persisted under the historical name `createdAt`. It is
/// rewritten by every mutation, so it holds the time of the last write rather
/// than the creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub model: String,
    pub version: String,
    pub mileage: u64,
    pub depreciation: u64,
    #[serde(rename = "createdAt", alias = "lastModified")]
    pub last_modified: u64,
}

/// Fields supplied by the caller when a vehicle is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVehicle {
    pub model: String,
    pub version: String,
    pub mileage: u64,
    pub depreciation: u64,
}

impl NewVehicle {
    pub fn new(
        model: impl Into<String>,
        version: impl Into<String>,
        mileage: u64,
        depreciation: u64,
    ) -> Self {
        Self {
            model: model.into(),
            version: version.into(),
            mileage,
            depreciation,
        }
    }

    pub(crate) fn into_vehicle(self, id: String, now: u64) -> Vehicle {
        Vehicle {
            id,
            model: self.model,
            version: self.version,
            mileage: self.mileage,
            depreciation: self.depreciation,
            last_modified: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleField {
    Id,
    Model,
    Version,
    Mileage,
    Depreciation,
    LastModified,
}

impl VehicleField {
    pub fn name(&self) -> &'static str {
        match self {
            VehicleField::Id => "id",
            VehicleField::Model => "model",
            VehicleField::Version => "version",
            VehicleField::Mileage => "mileage",
            VehicleField::Depreciation => "depreciation",
            VehicleField::LastModified => "createdAt",
        }
    }

    /// Orders two vehicles by this field. Numeric fields compare as numbers,
    /// string fields lexicographically.
    pub fn compare(&self, a: &Vehicle, b: &Vehicle) -> Ordering {
        match self {
            VehicleField::Id => a.id.cmp(&b.id),
            VehicleField::Model => a.model.cmp(&b.model),
            VehicleField::Version => a.version.cmp(&b.version),
            VehicleField::Mileage => a.mileage.cmp(&b.mileage),
            VehicleField::Depreciation => a.depreciation.cmp(&b.depreciation),
            VehicleField::LastModified => a.last_modified.cmp(&b.last_modified),
        }
    }
}

impl FromStr for VehicleField {
    type Err = VehicleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "id" => Ok(VehicleField::Id),
            "model" => Ok(VehicleField::Model),
            "version" => Ok(VehicleField::Version),
            "mileage" => Ok(VehicleField::Mileage),
            "depreciation" => Ok(VehicleField::Depreciation),
            "createdat" | "lastmodified" => Ok(VehicleField::LastModified),
            _ => Err(VehicleError::UnknownField(s.to_string())),
        }
    }
}

impl fmt::Display for VehicleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sparse set of equality constraints. A `None` field imposes no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleCriteria {
    pub id: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub mileage: Option<u64>,
    pub depreciation: Option<u64>,
    pub last_modified: Option<u64>,
}

impl VehicleCriteria {
    /// Adds a constraint from its textual form, parsing numeric fields.
    pub fn with(mut self, field: &str, value: &str) -> Result<Self> {
        let field: VehicleField = field.parse()?;
        match field {
            VehicleField::Id => self.id = Some(value.to_string()),
            VehicleField::Model => self.model = Some(value.to_string()),
            VehicleField::Version => self.version = Some(value.to_string()),
            VehicleField::Mileage => self.mileage = Some(parse_number(field, value)?),
            VehicleField::Depreciation => self.depreciation = Some(parse_number(field, value)?),
            VehicleField::LastModified => self.last_modified = Some(parse_number(field, value)?),
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == VehicleCriteria::default()
    }

    pub fn matches(&self, vehicle: &Vehicle) -> bool {
        fn check<T: PartialEq + ?Sized>(expected: Option<&T>, actual: &T) -> bool {
            expected.map_or(true, |expected| expected == actual)
        }

        check(self.id.as_deref(), vehicle.id.as_str())
            && check(self.model.as_deref(), vehicle.model.as_str())
            && check(self.version.as_deref(), vehicle.version.as_str())
            && check(self.mileage.as_ref(), &vehicle.mileage)
            && check(self.depreciation.as_ref(), &vehicle.depreciation)
            && check(self.last_modified.as_ref(), &vehicle.last_modified)
    }
}

pub(crate) fn parse_number(field: VehicleField, value: &str) -> Result<u64> {
    value.parse().map_err(|_| VehicleError::InvalidValue {
        field: field.name(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn civic() -> Vehicle {
        NewVehicle::new("Civic", "2020", 1000, 500).into_vehicle("v1".into(), 42)
    }

    #[test]
    fn empty_criteria_match_everything() {
        let criteria = VehicleCriteria::default();
        assert!(criteria.is_empty());
        assert!(criteria.matches(&civic()));
    }

    #[test]
    fn criteria_require_every_constrained_field() -> anyhow::Result<()> {
        let vehicle = civic();

        let model_only = VehicleCriteria::default().with("model", "Civic")?;
        assert!(model_only.matches(&vehicle));

        let both = model_only.clone().with("mileage", "1000")?;
        assert!(both.matches(&vehicle));

        let wrong_mileage = model_only.with("mileage", "999")?;
        assert!(!wrong_mileage.matches(&vehicle));

        let by_timestamp = VehicleCriteria::default().with("createdAt", "42")?;
        assert!(by_timestamp.matches(&vehicle));
        Ok(())
    }

    #[test]
    fn criteria_reject_bad_input() {
        let unknown = VehicleCriteria::default().with("colour", "red");
        assert!(matches!(unknown, Err(VehicleError::UnknownField(f)) if f == "colour"));

        let bad_number = VehicleCriteria::default().with("mileage", "lots");
        assert!(matches!(
            bad_number,
            Err(VehicleError::InvalidValue { field: "mileage", .. })
        ));
    }

    #[test]
    fn field_names_parse_case_insensitively() -> anyhow::Result<()> {
        assert_eq!("Mileage".parse::<VehicleField>()?, VehicleField::Mileage);
        assert_eq!("createdAt".parse::<VehicleField>()?, VehicleField::LastModified);
        assert_eq!("lastModified".parse::<VehicleField>()?, VehicleField::LastModified);
        assert!("wheels".parse::<VehicleField>().is_err());
        Ok(())
    }

    #[test]
    fn string_fields_compare_lexicographically() {
        let mut a = civic();
        let mut b = civic();
        a.model = "Accord".into();
        b.model = "Civic".into();
        a.mileage = 10;
        b.mileage = 9;

        assert_eq!(VehicleField::Model.compare(&a, &b), Ordering::Less);
        assert_eq!(VehicleField::Mileage.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn last_modified_keeps_created_at_on_disk() -> anyhow::Result<()> {
        let json = serde_json::to_value(civic())?;
        assert_eq!(json["createdAt"], 42);
        assert!(json.get("lastModified").is_none());

        let parsed: Vehicle = serde_json::from_str(
            r#"{"id":"v9","model":"Golf","version":"7","mileage":1,"depreciation":2,"lastModified":3}"#,
        )?;
        assert_eq!(parsed.last_modified, 3);
        Ok(())
    }
}
