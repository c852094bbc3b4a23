use std::time::SystemTime;

/// Get the UNIX time in seconds.
pub fn unix() -> u64 {
	// Calculate the amount of time since the UNIX epoch.
	let unix = SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.expect("The current time should be after the UNIX epoch");

	// Return the duration in seconds.
	unix.as_secs()
}
