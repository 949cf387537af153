/// Absorbs errors that must not interrupt the caller.
///
/// Used where a failure is worth reporting but the surrounding work has to go on, e.g. a state
/// file that cannot be written after the network is already up.
pub trait ResultOkLogExt<T, E> {
    /// Logs the error, if any, and converts the result into an [`Option`].
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{err}");
                None
            }
        }
    }
}
