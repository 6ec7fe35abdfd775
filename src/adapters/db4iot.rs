use anyhow::Result;

use crate::{
    adapters::PositionAdapter,
    db4iot::Record,
    position::{Source, VehiclePosition},
};

pub struct Db4iotAdapter<'a> {
    records: &'a [Record],
}

impl<'a> Db4iotAdapter<'a> {
    pub fn new(records: &'a [Record]) -> Self {
        Self { records }
    }
}

impl<'a> PositionAdapter for Db4iotAdapter<'a> {
    type Error = anyhow::Error;

    fn source(&self) -> Source {
        Source::Db4iot
    }

    fn positions(&self) -> Result<Vec<VehiclePosition>> {
        self.records
            .iter()
            .map(|r| {
                let mut p = VehiclePosition::new(
                    Source::Db4iot,
                    r.vehicle_id.clone(),
                    r.latitude,
                    r.longitude,
                    r.recorded_at()?,
                );
                p.route = r.route;
                p.direction = r.direction;
                p.trip_id = r.trip_id.clone();
                p.bearing = r.bearing;
                Ok(p)
            })
            .collect()
    }
}
