// Domain layer: models and ports. Adapters implement the ports against Google and HubSpot.

pub mod model;
pub mod ports;
