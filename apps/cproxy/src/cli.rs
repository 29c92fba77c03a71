use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use cproxy_common::{GlobalConfigPatch, RefreshFailurePolicy};

#[derive(Parser, Debug)]
#[command(name = "cproxy", about = "OpenAI-compatible gateway for GitHub Copilot chat")]
pub(crate) struct Cli {
    /// JSON config file. Command-line flags and env vars take precedence.
    #[arg(long, global = true, env = "CPROXY_CONFIG")]
    pub(crate) config: Option<PathBuf>,
    /// Directory holding the token file.
    #[arg(long, global = true, default_value = "")]
    pub(crate) data_dir: String,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Serve the chat gateway.
    Start(StartArgs),
    /// Log in with the GitHub device flow and store the access token.
    Login(ClientArgs),
    /// Delete the stored access token.
    Logout,
    /// Print the version.
    Version,
}

/// Outbound client settings shared by every command that talks to GitHub.
#[derive(Args, Debug, Default)]
pub(crate) struct ClientArgs {
    /// Outbound HTTP(S)/SOCKS proxy for upstream calls.
    #[arg(long, env = "CPROXY_PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "CPROXY_CONNECT_TIMEOUT_SECS")]
    pub(crate) connect_timeout_secs: Option<u64>,
    #[arg(long, env = "CPROXY_REQUEST_TIMEOUT_SECS")]
    pub(crate) request_timeout_secs: Option<u64>,
    #[arg(long, env = "CPROXY_IDLE_TIMEOUT_SECS")]
    pub(crate) idle_timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct StartArgs {
    #[arg(long, env = "CPROXY_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "CPROXY_PORT")]
    pub(crate) port: Option<u16>,
    #[command(flatten)]
    pub(crate) client: ClientArgs,
    /// Model used when a request names none.
    #[arg(long, env = "CPROXY_MODEL")]
    pub(crate) model: Option<String>,
    #[arg(long, env = "CPROXY_TEMPERATURE")]
    pub(crate) temperature: Option<f64>,
    #[arg(long, env = "CPROXY_TOP_P")]
    pub(crate) top_p: Option<f64>,
    #[arg(long, env = "CPROXY_N")]
    pub(crate) n: Option<i64>,
    /// Stream responses when a request omits `stream`.
    #[arg(long, env = "CPROXY_STREAM")]
    pub(crate) stream: Option<bool>,
    #[arg(long, env = "CPROXY_REFRESH_INTERVAL_SECS")]
    pub(crate) refresh_interval_secs: Option<u64>,
    /// `retry` or `stop`.
    #[arg(long, env = "CPROXY_REFRESH_FAILURE")]
    pub(crate) refresh_failure: Option<RefreshFailurePolicy>,
    #[arg(long, env = "CPROXY_CORS_ORIGINS", value_delimiter = ',')]
    pub(crate) cors_origins: Option<Vec<String>>,
    #[arg(long, env = "CPROXY_CORS_METHODS", value_delimiter = ',')]
    pub(crate) cors_methods: Option<Vec<String>>,
    #[arg(long, env = "CPROXY_CORS_HEADERS", value_delimiter = ',')]
    pub(crate) cors_headers: Option<Vec<String>>,
    #[arg(long, env = "CPROXY_CORS_ALLOW_CREDENTIALS")]
    pub(crate) cors_allow_credentials: Option<bool>,
}

impl ClientArgs {
    pub(crate) fn to_patch(&self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            proxy: self.proxy.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
            ..GlobalConfigPatch::default()
        }
    }
}

impl StartArgs {
    pub(crate) fn to_patch(&self) -> GlobalConfigPatch {
        let mut patch = GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            n: self.n,
            stream: self.stream,
            refresh_interval_secs: self.refresh_interval_secs,
            refresh_failure: self.refresh_failure,
            cors_origins: self.cors_origins.clone(),
            cors_methods: self.cors_methods.clone(),
            cors_headers: self.cors_headers.clone(),
            cors_allow_credentials: self.cors_allow_credentials,
            ..GlobalConfigPatch::default()
        };
        patch.overlay(self.client.to_patch());
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_flags_into_patch() {
        let cli = Cli::try_parse_from([
            "cproxy",
            "start",
            "--port",
            "8080",
            "--model",
            "gpt-4o",
            "--refresh-failure",
            "stop",
            "--cors-origins",
            "http://a.test,http://b.test",
            "--proxy",
            "http://127.0.0.1:7890",
        ])
        .unwrap();
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        let patch = args.to_patch();
        assert_eq!(patch.port, Some(8080));
        assert_eq!(patch.model.as_deref(), Some("gpt-4o"));
        assert_eq!(patch.refresh_failure, Some(RefreshFailurePolicy::Stop));
        assert_eq!(
            patch.cors_origins,
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
        assert_eq!(patch.proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(patch.host, None);
    }

    #[test]
    fn data_dir_is_global() {
        let cli = Cli::try_parse_from(["cproxy", "logout", "--data-dir", "/tmp/cp"]).unwrap();
        assert_eq!(cli.data_dir, "/tmp/cp");
        assert!(matches!(cli.command, Command::Logout));
    }
}
