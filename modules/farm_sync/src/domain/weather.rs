use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::contract::model::WeatherLocation;
use crate::domain::error::DomainError;

/// Process-wide location used for weather lookups. Survives sign-out.
pub struct WeatherStore {
    current: watch::Sender<WeatherLocation>,
}

impl Default for WeatherStore {
    fn default() -> Self {
        Self::new(WeatherLocation::default())
    }
}

impl WeatherStore {
    pub fn new(initial: WeatherLocation) -> Self {
        let (current, _) = watch::channel(initial);
        Self { current }
    }

    pub fn current(&self) -> WeatherLocation {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WeatherLocation> {
        self.current.subscribe()
    }

    /// Replace the location as-is.
    pub fn set_current_location(&self, location: WeatherLocation) {
        debug!(name = %location.name, "Weather location set");
        self.current.send_replace(location);
    }

    #[instrument(name = "farm_sync.weather.update_location", skip(self))]
    pub fn update_location(&self, lat: f64, lon: f64, name: &str) -> Result<(), DomainError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(DomainError::invalid_coordinates(lat, lon));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::empty_location_name());
        }

        self.set_current_location(WeatherLocation {
            lat,
            lon,
            name: name.to_string(),
        });
        Ok(())
    }
}
