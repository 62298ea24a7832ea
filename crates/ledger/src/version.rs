use tally_types::Version;

/// Monotonic clip over the environment-supplied version.
///
/// The "current version" reaching a ledger is untrusted input; the
/// watermark guarantees that whatever the environment reports, the version
/// the ledger acts on never moves backwards. Clipping and advancing are
/// separate steps so an operation that fails after clipping leaves no
/// trace in the watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionWatermark {
    last: Version,
}

impl VersionWatermark {
    pub fn starting_at(version: Version) -> Self {
        Self { last: version }
    }

    /// Version the ledger should operate at for an environment-supplied
    /// value: the supplied version, unless it falls behind the watermark.
    pub fn clip(&self, supplied: Version) -> Version {
        self.last.max(supplied)
    }

    /// Record a version as observed, once the operation that used it has
    /// committed.
    pub fn advance_to(&mut self, version: Version) {
        if version > self.last {
            self.last = version;
        }
    }

    pub fn current(&self) -> Version {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_never_moves_backwards() {
        let mut wm = VersionWatermark::default();
        assert_eq!(wm.clip(10), 10);
        wm.advance_to(10);
        assert_eq!(wm.clip(7), 10);
        assert_eq!(wm.clip(11), 11);
    }

    #[test]
    fn clip_alone_does_not_advance() {
        let wm = VersionWatermark::starting_at(20);
        assert_eq!(wm.clip(30), 30);
        assert_eq!(wm.current(), 20);
        assert_eq!(wm.clip(5), 20);
    }

    #[test]
    fn advance_ignores_older_versions() {
        let mut wm = VersionWatermark::starting_at(20);
        wm.advance_to(5);
        assert_eq!(wm.current(), 20);
        wm.advance_to(25);
        assert_eq!(wm.current(), 25);
    }
}
