use clap::{Arg, ArgAction, Command};
use colored::Colorize;
use entry_preview::render::{self, RenderPlan};
use entry_preview::{
    setup_logging, Classification, ClassifierConfig, HttpProxy, LogConfig, NetworkProxy,
    OfflineProxy, PolicyConfig, UrlClassifier,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = Command::new("Entry Preview CLI")
        .version("0.3")
        .about("Classify links the way the preview extension would show them")
        .arg(
            Arg::new("urls")
                .help("Links to classify")
                .num_args(0..),
        )
        .arg(
            Arg::new("offline")
                .long("offline")
                .help("Never touch the network; lookups fall back to frames")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("nocookie")
                .long("nocookie")
                .help("Embed YouTube through its no-cookie domain")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .help("Lookup timeout in seconds (default: 15)")
                .value_name("SECONDS"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .help("Print the compiled frame script rule set; reads PATH if given")
                .value_name("PATH")
                .num_args(0..=1)
                .default_missing_value(""),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") { "debug" } else { "warn" };
    setup_logging(LogConfig::default().with_log_level(log_level))?;

    if let Some(path) = matches.get_one::<String>("policy") {
        let config = if path.is_empty() {
            PolicyConfig::default()
        } else {
            PolicyConfig::from_json(&std::fs::read_to_string(path)?)?
        };
        let rule_set = config.compile()?;
        println!("{}", rule_set.to_json()?);
        return Ok(());
    }

    let mut config = ClassifierConfig::default()
        .with_privacy_enhanced_embeds(matches.get_flag("nocookie"));
    if let Some(secs) = matches.get_one::<String>("timeout") {
        config = config.with_lookup_timeout(Duration::from_secs(secs.parse()?));
    }

    let proxy: Arc<dyn NetworkProxy> = if matches.get_flag("offline") {
        println!("{}", "Offline mode: no network lookups".yellow());
        Arc::new(OfflineProxy)
    } else {
        Arc::new(HttpProxy::default())
    };
    let classifier = UrlClassifier::new_with_config(proxy, config);

    let urls: Vec<&str> = matches
        .get_many::<String>("urls")
        .map(|values| values.map(String::as_str).collect())
        .unwrap_or_default();
    if urls.is_empty() {
        println!("{}", "No links given".red());
        return Ok(());
    }

    println!("{}", "Entry Preview".bold().green());
    println!("{}", "=============".green());

    let results = classifier.classify_all(&urls).await;
    for (url, classification) in urls.iter().zip(&results) {
        print_classification(url, classification);
    }

    Ok(())
}

fn print_classification(url: &str, classification: &Classification) {
    println!("\n{} {}", "Link:".bold(), url.blue());
    let kind = match classification {
        Classification::Blocked => classification.kind().red(),
        Classification::Frame { .. } => classification.kind().yellow(),
        _ => classification.kind().green(),
    };
    println!("{} {}", "Kind:".bold(), kind);

    match render::plan(url, classification) {
        RenderPlan::Remove => println!("  {}", "link removed".red()),
        RenderPlan::Show(elements) => {
            for element in elements {
                println!(
                    "  {:?} {} ({}px, border {})",
                    element.kind, element.src, element.height_px, element.border_color
                );
            }
        }
    }
}
