// Version Probe Port
// Reports the source revision of an installation directory

use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait VersionProbe: Send + Sync {
    /// Revision identifier (e.g. a git commit hash), None if unknown
    async fn revision(&self, dir: &Path) -> Option<String>;
}

pub mod mocks {
    use super::*;

    /// Always reports the same revision
    pub struct FixedVersionProbe(pub Option<String>);

    #[async_trait]
    impl VersionProbe for FixedVersionProbe {
        async fn revision(&self, _dir: &Path) -> Option<String> {
            self.0.clone()
        }
    }
}
