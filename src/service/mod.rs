pub mod deletion;
pub mod generation;
pub mod oauth;
pub mod params;
