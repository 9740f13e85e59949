use std::time::SystemTime;
use std::time::UNIX_EPOCH;

#[inline]
/// Returns the current Unix timestamp in milliseconds
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_millis() as u64).unwrap_or(0)
}

#[inline]
/// Calculates the elapsed time in milliseconds since a given timestamp
pub fn elapsed_since_ms(timestamp_ms: u64) -> u64 {
    unix_timestamp_ms().saturating_sub(timestamp_ms)
}
