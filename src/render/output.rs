//! Output file naming.

use std::path::PathBuf;

/// Produces `<base>.<NNNN>.<format>` names from a running counter.
#[derive(Debug, Clone)]
pub struct OutputNamer {
    base: String,
    format: String,
    counter: u32,
}

impl OutputNamer {
    pub fn new(base: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            format: format.into(),
            counter: 0,
        }
    }

    /// Counter value the next call starts from.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn path_for(&self, n: u32) -> PathBuf {
        PathBuf::from(format!("{}.{:04}.{}", self.base, n, self.format))
    }

    /// Next output path.
    ///
    /// Without `force_overwrite` numbers of existing files are skipped. The
    /// counter advances by one per call either way.
    pub fn next_path(&mut self, force_overwrite: bool) -> PathBuf {
        let path = if force_overwrite {
            self.path_for(self.counter)
        } else {
            let mut n = self.counter;
            loop {
                let candidate = self.path_for(n);
                if !candidate.exists() {
                    break candidate;
                }
                n += 1;
            }
        };
        self.counter += 1;
        path
    }
}
