use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "zalo-advisor",
    version,
    about = "Zalo chat-bot backend with a config-driven LLM agent"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the control surface, agent, and bot.
    Serve(ServeOpts),
    Config(ConfigOpts),
    Version,
}

#[derive(clap::Args)]
pub struct ServeOpts {
    #[arg(short, long, env = "ZALO_ADVISOR_CONFIG")]
    pub config: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    #[arg(short, long)]
    pub bind: Option<String>,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[arg(short, long, env = "ZALO_ADVISOR_CONFIG")]
    pub config: Option<String>,
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective settings with secrets masked.
    Show,
    /// Strictly validate the settings file.
    Validate,
    /// Write a default settings file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from(["zalo-advisor", "serve", "--port", "9000", "-b", "0.0.0.0"])
            .unwrap();
        match cli.command {
            Commands::Serve(opts) => {
                assert_eq!(opts.port, Some(9000));
                assert_eq!(opts.bind.as_deref(), Some("0.0.0.0"));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn parses_config_init() {
        let cli = Cli::try_parse_from(["zalo-advisor", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigOpts {
                action: ConfigAction::Init { force: true },
                ..
            })
        ));
    }
}
