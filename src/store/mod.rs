pub mod backend;
pub mod clock;
pub mod vehicle;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, VehicleError};
use backend::Backend;
use clock::{Clock, SystemClock};
use vehicle::{NewVehicle, Vehicle, VehicleCriteria, VehicleField};

/// Vehicle records keyed by id.
///
/// Every operation holds the lock for its whole read-modify-write, so callers
/// on different connections never observe a half-applied update.
pub struct VehicleStore<B, C = SystemClock> {
    data: RwLock<B>,
    clock: C,
}

impl<B: Backend> VehicleStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_clock(backend, SystemClock::new())
    }
}

impl<B: Backend, C: Clock> VehicleStore<B, C> {
    pub fn with_clock(backend: B, clock: C) -> Self {
        Self {
            data: RwLock::new(backend),
            clock,
        }
    }

    /// Stores a new vehicle under a freshly generated id.
    pub async fn create(&self, vehicle: NewVehicle) -> Result<Vehicle> {
        self.put(Uuid::new_v4().to_string(), vehicle).await
    }

    /// Upserts a vehicle under `id`, replacing any existing record.
    pub async fn put(&self, id: impl Into<String>, vehicle: NewVehicle) -> Result<Vehicle> {
        let mut data = self.data.write().await;
        let vehicle = vehicle.into_vehicle(id.into(), self.clock.now());
        data.insert(vehicle.clone()).await?;
        debug!(id = %vehicle.id, "vehicle stored");
        Ok(vehicle)
    }

    pub async fn get(&self, id: &str) -> Result<Vehicle> {
        let data = self.data.read().await;
        data.get(id)
            .cloned()
            .ok_or_else(|| VehicleError::NotFound(id.to_string()))
    }

    pub async fn add_mileage(&self, id: &str, miles: u64) -> Result<Vehicle> {
        self.accumulate(id, VehicleField::Mileage, |v| &mut v.mileage, miles)
            .await
    }

    pub async fn add_depreciation(&self, id: &str, depreciation: u64) -> Result<Vehicle> {
        self.accumulate(id, VehicleField::Depreciation, |v| &mut v.depreciation, depreciation)
            .await
    }

    /// Adds `amount` to one counter of a vehicle. On overflow nothing is written.
    async fn accumulate(
        &self,
        id: &str,
        field: VehicleField,
        counter: fn(&mut Vehicle) -> &mut u64,
        amount: u64,
    ) -> Result<Vehicle> {
        let mut data = self.data.write().await;
        let mut vehicle = data
            .get(id)
            .cloned()
            .ok_or_else(|| VehicleError::NotFound(id.to_string()))?;

        let value = counter(&mut vehicle);
        *value = value.checked_add(amount).ok_or_else(|| VehicleError::Overflow {
            id: id.to_string(),
            field: field.name(),
        })?;
        vehicle.last_modified = self.clock.now();

        data.insert(vehicle.clone()).await?;
        debug!(id, %field, amount, "vehicle updated");
        Ok(vehicle)
    }

    /// Vehicles matching every constraint in `criteria`, in key order.
    pub async fn filter(&self, criteria: &VehicleCriteria) -> Vec<Vehicle> {
        let data = self.data.read().await;
        data.scan()
            .filter(|vehicle| criteria.matches(vehicle))
            .cloned()
            .collect()
    }

    /// All vehicles in ascending order of `field`. Ties keep key order.
    pub async fn sort_by(&self, field: VehicleField) -> Vec<Vehicle> {
        let mut vehicles: Vec<Vehicle> = {
            let data = self.data.read().await;
            data.scan().cloned().collect()
        };
        vehicles.sort_by(|a, b| field.compare(a, b));
        vehicles
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
