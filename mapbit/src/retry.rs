use std::time::Duration;

/// Runs `op` up to `attempts` times, returning the first success or the last error.
pub fn retry_bounded<F, T, E>(attempts: usize, op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
{
    retry_with_delay(attempts, Duration::ZERO, op)
}

/// Like [`retry_bounded`] but sleeps `delay` between attempts. `op` receives the attempt number, starting at 1.
pub fn retry_with_delay<F, T, E>(attempts: usize, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(_e) if attempt < attempts => {
                attempt += 1;
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
