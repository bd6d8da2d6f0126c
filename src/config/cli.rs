use crate::config::toml_config::SyncConfig;
use crate::core::owner::OwnerSource;
use crate::domain::model::CrmObjectType;
use crate::utils::error::Result;
use clap::Parser;

/// 命令列參數；未指定的值沿用設定檔或預設值
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "drive-hubspot-sync")]
#[command(about = "Attach Google Drive files to the HubSpot records of their owners")]
pub struct CliConfig {
    #[arg(long, help = "TOML config file")]
    pub config: Option<String>,

    #[arg(long, env = "GOOGLE_FOLDER_ID", help = "Google Drive folder to process")]
    pub folder_id: Option<String>,

    #[arg(long, env = "GOOGLE_CREDENTIALS_PATH", help = "OAuth client secrets JSON")]
    pub credentials_path: Option<String>,

    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    pub google_access_token: Option<String>,

    #[arg(long, help = "Where the Google token is cached")]
    pub token_cache: Option<String>,

    #[arg(long, help = "Fail instead of opening the browser consent flow")]
    pub non_interactive: bool,

    #[arg(long, env = "HUBSPOT_ACCESS_TOKEN", hide_env_values = true)]
    pub hubspot_token: Option<String>,

    #[arg(long, help = "HubSpot File Manager folder for uploads")]
    pub hubspot_folder: Option<String>,

    #[arg(long, value_delimiter = ',', help = "permissions, owners, file-name")]
    pub owner_source: Vec<OwnerSource>,

    #[arg(long, value_delimiter = ',', help = "contacts, companies")]
    pub match_objects: Vec<CrmObjectType>,

    #[arg(long, value_delimiter = ',', help = "companies, deals, tickets")]
    pub include_associated: Vec<CrmObjectType>,

    #[arg(long)]
    pub concurrent_files: Option<usize>,

    #[arg(long, help = "Resolve matches without uploading anything")]
    pub dry_run: bool,

    #[arg(long, help = "Write a JSON report of every file")]
    pub report: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log as JSON lines")]
    pub log_json: bool,
}

impl CliConfig {
    /// 合併設定檔與命令列參數，命令列優先
    pub fn resolve(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => {
                tracing::debug!("Loading config file {}", path);
                SyncConfig::from_file(path)?
            }
            None => SyncConfig::default(),
        };
        self.apply_to(&mut config);
        Ok(config)
    }

    pub fn apply_to(&self, config: &mut SyncConfig) {
        if let Some(folder_id) = &self.folder_id {
            config.google.folder_id = folder_id.clone();
        }
        if let Some(path) = &self.credentials_path {
            config.google.credentials_path = Some(path.clone());
        }
        if let Some(token) = &self.google_access_token {
            config.google.access_token = Some(token.clone());
        }
        if let Some(path) = &self.token_cache {
            config.google.token_cache = path.clone();
        }
        if self.non_interactive {
            config.google.interactive = false;
        }
        if let Some(token) = &self.hubspot_token {
            config.hubspot.access_token = token.clone();
        }
        if let Some(folder) = &self.hubspot_folder {
            config.hubspot.folder_path = folder.clone();
        }
        if !self.owner_source.is_empty() {
            config.sync.owner_sources = self.owner_source.clone();
        }
        if !self.match_objects.is_empty() {
            config.sync.match_objects = self.match_objects.clone();
        }
        if !self.include_associated.is_empty() {
            config.sync.include_associated = self.include_associated.clone();
        }
        if let Some(n) = self.concurrent_files {
            config.sync.concurrent_files = n;
        }
        if self.dry_run {
            config.sync.dry_run = true;
        }
        if let Some(report) = &self.report {
            config.sync.report_path = Some(report.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SyncSettings;

    #[test]
    fn test_parse_flags() {
        let cli = CliConfig::try_parse_from([
            "drive-hubspot-sync",
            "--folder-id",
            "abc",
            "--hubspot-token",
            "pat",
            "--owner-source",
            "owners,file-name",
            "--match-objects",
            "contacts,companies",
            "--dry-run",
        ])
        .unwrap();

        let config = cli.resolve().unwrap();
        assert_eq!(config.folder_id(), "abc");
        assert_eq!(
            config.owner_sources(),
            &[OwnerSource::Owners, OwnerSource::FileName]
        );
        assert_eq!(config.match_objects().len(), 2);
        assert!(config.dry_run());
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = SyncConfig::from_toml_str(
            r#"
[google]
folder_id = "from-file"

[sync]
concurrent_files = 2
"#,
        )
        .unwrap();

        let cli = CliConfig {
            folder_id: Some("from-cli".to_string()),
            non_interactive: true,
            ..Default::default()
        };
        cli.apply_to(&mut config);

        assert_eq!(config.google.folder_id, "from-cli");
        assert!(!config.google.interactive);
        assert_eq!(config.sync.concurrent_files, 2);
    }

    #[test]
    fn test_rejects_unknown_object_type() {
        let result = CliConfig::try_parse_from([
            "drive-hubspot-sync",
            "--match-objects",
            "leads",
        ]);
        assert!(result.is_err());
    }
}
