use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use clap::Parser;
use docrag::{
    ConfigDb,
    DataDir,
    Error,
    ModelManager,
    Result,
    Retriever,
    answer::Answerer,
    generation::GeminiGenerator,
    indexer::Indexer,
    mcp,
    model_manager::{self, MODEL_SETTING_KEY},
    retry::RetryPolicy,
    search,
    settings::{self, KNOWN_KEYS, Settings},
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, ModelAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Add(args) => cmd_add(&data_dir, &args.files)?,
        Command::Index(args) => {
            let settings = Settings::resolve(&config_db)?;
            let source = match args.source {
                Some(source) => source,
                None => data_dir.documents_dir()?,
            };
            let indexer = Indexer::from_settings(data_dir.clone(), &settings)?;
            let model = Mutex::new(load_model(cli.model.as_deref(), &config_db)?);

            let report = indexer.index_new(&source, &model)?;
            if args.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("{report}");
                for (document, reason) in &report.failed {
                    eprintln!("  failed: {document}: {reason}");
                }
            }
        }
        Command::Search(args) => {
            let settings = Settings::resolve(&config_db)?;
            let top_k = args.count.unwrap_or(settings.top_k);
            let lambda =
                settings::check_lambda(args.lambda.unwrap_or(settings.mmr_lambda))?;
            let retriever = Retriever::open(&data_dir)?;
            let mut model = load_model(cli.model.as_deref(), &config_db)?;

            let hits = retriever.search(
                &mut model,
                &args.query,
                top_k,
                !args.no_rerank,
                lambda,
            )?;

            if args.json {
                println!("{}", search::format_json(&hits, &args.query)?);
            } else {
                println!("{}", search::format_human(&hits));
            }
        }
        Command::Ask(args) => {
            let settings = Settings::resolve(&config_db)?;
            let top_k = args.count.unwrap_or(settings.top_k);
            let retriever = Arc::new(Retriever::open(&data_dir)?);
            let model = Mutex::new(load_model(cli.model.as_deref(), &config_db)?);
            let generator =
                Arc::new(GeminiGenerator::new(settings.generation_model.clone())?);
            let answerer = Answerer::new(
                retriever,
                generator,
                RetryPolicy::default(),
                settings.mmr_lambda,
            );

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| {
                    Error::Config(format!("failed to start tokio runtime: {e}"))
                })?;
            let outcome = runtime.block_on(answerer.answer_with_sources(
                &model,
                &args.question,
                top_k,
            ))?;

            if args.json {
                println!("{}", serde_json::to_string(&outcome)?);
            } else {
                println!("{}", search::format_answer(&outcome));
            }
        }
        Command::Stats(args) => {
            let stats = Retriever::open(&data_dir)?.stats();
            if args.json {
                println!("{}", serde_json::to_string(&stats)?);
            } else {
                println!("{}", search::format_stats(&stats, data_dir.root()));
            }
        }
        Command::Mcp => {
            mcp::run_mcp(data_dir, config_db, cli.model.as_deref())?;
        }
        Command::Model { action } => match action {
            ModelAction::Show { json } => {
                let resolved = model_manager::resolve_model_id(
                    cli.model.as_deref(),
                    &config_db,
                )?;
                let source = model_source(cli.model.as_deref(), &config_db)?;
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "model": resolved, "source": source })
                    );
                } else {
                    println!("{resolved} ({source})");
                }
            }
            ModelAction::Set { model } => {
                Settings::set(&config_db, MODEL_SETTING_KEY, &model)?;
                println!("Model set to {model}");
            }
            ModelAction::Clear => {
                if config_db.remove_setting(MODEL_SETTING_KEY)? {
                    println!("Model setting cleared");
                } else {
                    println!("No model setting stored");
                }
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Show { json } => cmd_config_show(&config_db, json)?,
            ConfigAction::Set { key, value } => {
                Settings::set(&config_db, &key, &value)?;
                println!("Set {key} = {value}");
            }
            ConfigAction::Unset { key } => {
                if !config_db.remove_setting(&key)? {
                    return Err(Error::NotFound {
                        kind: "setting",
                        name: key,
                    });
                }
                println!("Unset {key}");
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

fn load_model(
    explicit: Option<&str>,
    config_db: &ConfigDb,
) -> Result<ModelManager> {
    let model_id = model_manager::resolve_model_id(explicit, config_db)?;
    Ok(ModelManager::with_model_id(model_id))
}

fn model_source(
    explicit: Option<&str>,
    config_db: &ConfigDb,
) -> Result<&'static str> {
    if explicit.is_some() {
        return Ok("--model");
    }
    if std::env::var(model_manager::MODEL_ENV_VAR).is_ok() {
        return Ok(model_manager::MODEL_ENV_VAR);
    }
    if config_db.get_setting(MODEL_SETTING_KEY)?.is_some() {
        return Ok("config");
    }
    Ok("default")
}

/// Copy PDFs into the documents directory. Existing files are left alone.
fn cmd_add(data_dir: &DataDir, files: &[PathBuf]) -> Result<()> {
    let documents = data_dir.documents_dir()?;
    for file in files {
        let is_pdf = file
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(Error::Config(format!(
                "only PDF files are supported: {}",
                file.display()
            )));
        }
        if !file.is_file() {
            return Err(Error::NotFound {
                kind: "file",
                name: file.display().to_string(),
            });
        }
    }

    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = documents.join(name);
        if target.exists() {
            println!("Skipped {} (already added)", target.display());
            continue;
        }
        std::fs::copy(file, &target)?;
        println!("Added {}", target.display());
    }
    println!("Run `docrag index` to index new documents.");
    Ok(())
}

fn cmd_config_show(config_db: &ConfigDb, json: bool) -> Result<()> {
    let stored: std::collections::BTreeMap<String, String> =
        config_db.list_settings()?.into_iter().collect();
    let settings = Settings::resolve(config_db)?;

    if json {
        let mut value = serde_json::to_value(&settings)?;
        value[MODEL_SETTING_KEY] = serde_json::Value::String(
            config_db.get_setting_or(
                MODEL_SETTING_KEY,
                model_manager::DEFAULT_MODEL_ID,
            )?,
        );
        println!("{value}");
        return Ok(());
    }

    let effective = serde_json::to_value(&settings)?;
    for (key, description) in KNOWN_KEYS {
        let value = match stored.get(*key) {
            Some(value) => value.clone(),
            None if *key == MODEL_SETTING_KEY => {
                model_manager::DEFAULT_MODEL_ID.to_string()
            }
            None => display_value(&effective[*key]),
        };
        let marker = if stored.contains_key(*key) { "" } else { " (default)" };
        println!("{key} = {value}{marker}\n    {description}");
    }
    Ok(())
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
