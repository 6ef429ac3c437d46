use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "rpki-rsyncd", version, about = "Read-only rsync daemon serving repository trees from memory")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Port to listen on.
    #[arg(long, default_value_t = 873)]
    pub port: u16,

    /// Repository root; every immediate subdirectory is served as a module.
    #[arg(long)]
    pub root: PathBuf,

    /// Description shown next to each module in listings.
    #[arg(long, default_value = "RPKI repository")]
    pub description: String,

    /// Settle time for filesystem changes before a snapshot rebuild, in
    /// milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub debounce_ms: u64,

    /// Log filter directive, e.g. "info" or "daemon=debug,protocol=trace".
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = Config::parse_from(["rpki-rsyncd", "--root", "/srv/rpki"]);
        assert_eq!(config.port, 873);
        assert_eq!(config.address.to_string(), "0.0.0.0");
        assert_eq!(config.debounce_ms, 2_000);
        assert_eq!(config.root, PathBuf::from("/srv/rpki"));
    }

    #[test]
    fn root_is_required() {
        assert!(Config::try_parse_from(["rpki-rsyncd"]).is_err());
    }
}
