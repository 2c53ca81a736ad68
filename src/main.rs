use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use zalo_advisor::app::App;
use zalo_advisor::cli::{Cli, Commands, ConfigAction};
use zalo_advisor::config::{
    load_settings_file, redact, resolve_settings_path, Settings, SettingsStore,
};
use zalo_advisor::gateway::{resolve_bind_address, GatewayServer};
use zalo_advisor::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(opts) => {
            let path = resolve_settings_path(opts.config.as_deref());
            let addr = resolve_bind_address(opts.bind.as_deref(), opts.port)?;
            info!("Starting zalo-advisor with settings at {}", path.display());

            let store = Arc::new(SettingsStore::load(path));
            let app = App::build(store)?;
            app.start().await;

            let server = GatewayServer::new(app.gateway_state(), addr);
            let result = server.run_until_shutdown().await;
            app.shutdown().await;
            result?;
        }
        Commands::Config(opts) => {
            let path = resolve_settings_path(opts.config.as_deref());
            match opts.action {
                ConfigAction::Show => {
                    let mut settings = SettingsStore::load(&path).snapshot().as_ref().clone();
                    mask_secrets(&mut settings);
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                ConfigAction::Validate => match load_settings_file(&path) {
                    Ok(_) => info!("Configuration is valid"),
                    Err(e) => {
                        error!("{e:#}");
                        std::process::exit(1);
                    }
                },
                ConfigAction::Init { force } => {
                    if path.exists() && !force {
                        anyhow::bail!(
                            "{} already exists (use --force to overwrite)",
                            path.display()
                        );
                    }
                    Settings::write_default(&path)?;
                    info!("Configuration file created at {}", path.display());
                }
            }
        }
        Commands::Version => {
            println!("zalo-advisor {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn mask_secrets(settings: &mut Settings) {
    let model = &mut settings.agent_config.model;
    model.api_key = model.api_key.as_deref().map(redact);
    for tool in &mut settings.agent_config.tools {
        if let Some(search) = tool.search.as_mut() {
            search.api_key = search.api_key.as_deref().map(redact);
        }
    }
    let oa = &mut settings.zalo_config.oa;
    oa.secret_key = redact(&oa.secret_key);
    oa.access_token = oa.access_token.as_deref().map(redact);
    let personal = &mut settings.zalo_config.personal;
    personal.password = redact(&personal.password);
    for value in personal.cookies.values_mut() {
        *value = redact(value);
    }
}
