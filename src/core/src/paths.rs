use std::path::PathBuf;

use directories::BaseDirs;

/// Root of mnemo's on-disk state, `~/.mnemo` unless `MNEMO_HOME` overrides
/// it. Created on first use.
pub fn mnemo_home_dir() -> Result<PathBuf, String> {
    if let Some(override_dir) = std::env::var_os("MNEMO_HOME") {
        let path = PathBuf::from(override_dir);
        if path.is_relative() {
            return Err("MNEMO_HOME must be an absolute path".to_string());
        }
        std::fs::create_dir_all(&path)
            .map_err(|e| format!("failed to create MNEMO_HOME directory: {e}"))?;
        return Ok(path);
    }

    let base = BaseDirs::new()
        .ok_or_else(|| "failed to resolve user home; set MNEMO_HOME".to_string())?;
    let dir = base.home_dir().join(".mnemo");
    std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create ~/.mnemo: {e}"))?;
    Ok(dir)
}

pub fn mnemo_config_path() -> Result<PathBuf, String> {
    Ok(mnemo_home_dir()?.join("config.toml"))
}
