pub mod apt;
pub mod pip;

use crate::config::Settings;
use crate::error::{MirrorError, Result};
use crate::traits::SourceManager;

pub const SUPPORTED_TOOLS: &[&str] = &["apt", "pip"];

pub fn get_manager(name: &str, settings: &Settings) -> Result<Box<dyn SourceManager>> {
    match name.to_lowercase().as_str() {
        "apt" => Ok(Box::new(apt::AptManager::new(settings.apt.clone()))),
        "pip" => Ok(Box::new(pip::PipManager::new(settings.pip.clone()))),
        _ => Err(MirrorError::UnknownTool(format!(
            "Unsupported tool: '{}'. Available: {}",
            name,
            SUPPORTED_TOOLS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_manager() {
        let settings = Settings::default();
        assert_eq!(get_manager("APT", &settings).map(|m| m.name()).ok(), Some("apt"));
        assert_eq!(get_manager("pip", &settings).map(|m| m.name()).ok(), Some("pip"));
        assert!(matches!(
            get_manager("npm", &settings),
            Err(MirrorError::UnknownTool(_))
        ));
    }
}
