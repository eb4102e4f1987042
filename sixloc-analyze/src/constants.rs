pub const DEFAULT_RADIUS_KM: f64 = 50.0;
pub const NEAREST_LIMIT: usize = 5;
