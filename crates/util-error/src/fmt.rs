use std::error::Error;
use std::fmt;

/// Format an error with its whole `source()` chain on a single line
///
/// Handy for structured logging, where multi-line `{:#?}` output is
/// unreadable.
pub struct FmtCompactError<'e, E: ?Sized>(&'e E);

impl<E> fmt::Display for FmtCompactError<'_, E>
where
    E: Error + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

pub trait FmtCompact {
    fn fmt_compact(&self) -> FmtCompactError<'_, Self>;
}

impl<E> FmtCompact for E
where
    E: Error + ?Sized,
{
    fn fmt_compact(&self) -> FmtCompactError<'_, Self> {
        FmtCompactError(self)
    }
}
