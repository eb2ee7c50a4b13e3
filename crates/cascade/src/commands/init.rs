use crate::settings::Settings;
use cascade_capabilities::KnowledgeBase;
use cascade_telemetry::{write_json, Paths};
use std::path::Path;

pub fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let written = init_at(&paths, force)?;

    if written.is_empty() {
        println!("Already initialized in {} (use --force to overwrite)", paths.home.display());
    }
    for path in written {
        println!("✓ Wrote {}", path.display());
    }
    Ok(())
}

/// Write the default config and knowledge base; returns the files written
fn init_at(paths: &Paths, force: bool) -> anyhow::Result<Vec<std::path::PathBuf>> {
    std::fs::create_dir_all(paths.journal_dir())?;

    let mut written = Vec::new();
    if write_if_missing(&paths.config_file(), &Settings::default(), force)? {
        written.push(paths.config_file());
    }
    if write_if_missing(&paths.knowledge_file(), &KnowledgeBase::sample(), force)? {
        written.push(paths.knowledge_file());
    }
    Ok(written)
}

fn write_if_missing<T: serde::Serialize>(path: &Path, value: &T, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    write_json(path, value)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());

        let written = init_at(&paths, false).unwrap();
        assert_eq!(written.len(), 2);
        assert!(paths.journal_dir().is_dir());
        assert_eq!(Settings::load(&paths).unwrap(), Settings::default());
        assert_eq!(
            KnowledgeBase::load(&paths.knowledge_file()).unwrap(),
            KnowledgeBase::sample()
        );
    }

    #[test]
    fn test_init_keeps_existing_files_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        std::fs::write(paths.config_file(), "{}").unwrap();

        let written = init_at(&paths, false).unwrap();
        assert_eq!(written, vec![paths.knowledge_file()]);
        assert_eq!(std::fs::read_to_string(paths.config_file()).unwrap(), "{}");

        let written = init_at(&paths, true).unwrap();
        assert_eq!(written.len(), 2);
    }
}
