use anyhow::Result;

use crate::{
    adapters::PositionAdapter,
    position::{Source, VehiclePosition},
    trimet::{Vehicle, VehicleType},
};

pub struct TriMetAdapter<'a> {
    vehicles: &'a [Vehicle],
}

impl<'a> TriMetAdapter<'a> {
    pub fn new(vehicles: &'a [Vehicle]) -> Self {
        Self { vehicles }
    }
}

impl<'a> PositionAdapter for TriMetAdapter<'a> {
    type Error = anyhow::Error;

    fn source(&self) -> Source {
        Source::TriMet
    }

    fn positions(&self) -> Result<Vec<VehiclePosition>> {
        // MAX and streetcar share the feed
        self.vehicles
            .iter()
            .filter(|v| v.vehicle_type == VehicleType::Bus)
            .map(|v| {
                Ok(VehiclePosition {
                    source: Source::TriMet,
                    vehicle_id: v.vehicle_id.to_string(),
                    route: v.route_number,
                    direction: v.direction,
                    trip_id: v.trip_id.clone(),
                    block_id: v.block_id,
                    sign: v.sign_message.clone(),
                    lat: v.latitude,
                    lon: v.longitude,
                    bearing: v.bearing,
                    recorded_at: v.recorded_at()?,
                    delay_s: v.delay,
                })
            })
            .collect()
    }
}
