//! Redacting holder for the OAuth client secret

use std::fmt;
use std::path::Path;

use zeroize::Zeroize;

/// Value that never prints and is zeroed on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value. Call sites should pass it straight to the
    /// consumer (an HTTP header, a query) and never format it.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Read a secret kept in its own file, as mounted by a secrets manager.
    ///
    /// Surrounding whitespace (the trailing newline most editors add) is
    /// stripped. A file holding only whitespace yields `None`. The raw read
    /// buffer is wiped before returning.
    pub fn read_from(path: &Path) -> std::io::Result<Option<Self>> {
        let mut raw = std::fs::read_to_string(path)?;
        let trimmed = raw.trim();
        let secret = (!trimmed.is_empty()).then(|| Self::new(trimmed.to_owned()));
        raw.zeroize();
        Ok(secret)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
