use std::fmt;

/// Displays an error and its source chain on a single line.
///
/// Multi-line `Debug`/`Display` representations are hostile to structured
/// log fields, so log call sites use `err = %err.fmt_compact()`.
pub struct CompactFmt<'e, E: ?Sized>(&'e E);

impl<E> fmt::Display for CompactFmt<'_, E>
where
    E: std::error::Error + ?Sized,
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
    fn fmt_compact(&self) -> CompactFmt<'_, Self>;
}

impl<E> FmtCompact for E
where
    E: std::error::Error + ?Sized,
{
    fn fmt_compact(&self) -> CompactFmt<'_, Self> {
        CompactFmt(self)
    }
}
