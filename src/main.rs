//! NeuroScan console entry point.
//!
//! Terminal stand-in for the mobile screens: it dispatches session and history
//! actions and prints what the stores report back.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use neuroscan_console::analytics::{self, percent};
use neuroscan_console::config::{self, ServiceConfig};
use neuroscan_console::report::{
    resolve_heatmap_url, FileExportSink, ReportExporter, ReportFont, ReportSource,
};
use neuroscan_console::session::{PickOutcome, SessionAction, SessionController, SessionStatus};
use neuroscan_console::{AnalysisClient, AnalysisService, HistoryStore, Notice, NoticeKind};

#[derive(Parser, Debug)]
#[command(name = "neuroscan")]
#[command(version)]
#[command(about = "AI-powered neuro imaging diagnostic console", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit an MRI scan for analysis
    Analyze {
        /// Patient full name
        #[arg(short, long)]
        name: String,

        /// Path to the MRI image (JPG, PNG)
        #[arg(short, long)]
        image: PathBuf,

        /// Export a PDF report after a successful analysis
        #[arg(long)]
        report: bool,
    },

    /// List past scans
    History {
        /// Filter by patient name or diagnosis (case-insensitive)
        #[arg(short, long, default_value = "")]
        query: String,

        /// Export the PDF report for this record id
        #[arg(long)]
        report: Option<i64>,
    },

    /// Show the classifier's validation summary
    ModelCard,
}

#[tokio::main]
async fn main() -> ExitCode {
    neuroscan_console::init_tracing();
    let args = Args::parse();

    let outcome = match args.command {
        Commands::Analyze { name, image, report } => analyze(name, image, report).await,
        Commands::History { query, report } => history(query, report).await,
        Commands::ModelCard => {
            print_model_card();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(notice) => {
            eprintln!("{notice}");
            ExitCode::FAILURE
        }
    }
}

fn connect() -> Result<Arc<dyn AnalysisService>, Notice> {
    let config = ServiceConfig::from_env().map_err(config_notice)?;
    let client = AnalysisClient::new(config).map_err(|e| Notice::from(&e))?;
    Ok(Arc::new(client))
}

fn exporter(service: Arc<dyn AnalysisService>) -> Result<ReportExporter, Notice> {
    let dir = config::exports_dir().map_err(config_notice)?;
    let font = match config::report_font_path() {
        Some(path) => ReportFont::load(&path).map_err(|e| Notice::from(&e))?,
        None => ReportFont::Builtin,
    };
    Ok(ReportExporter::new(service, Arc::new(FileExportSink::new(dir))).with_font(font))
}

fn config_notice(e: config::ConfigError) -> Notice {
    Notice::new(NoticeKind::Validation, "Configuration", e.to_string())
}

async fn analyze(name: String, image: PathBuf, report: bool) -> Result<(), Notice> {
    let service = connect()?;
    let mut controller = SessionController::new(service.clone());

    controller.dispatch(SessionAction::SetPatientName(name)).await;
    controller
        .dispatch(SessionAction::ImagePicked(PickOutcome::Picked(
            image.to_string_lossy().into_owned(),
        )))
        .await;
    println!("Processing...");
    let status = controller.dispatch(SessionAction::Submit).await;

    let mut notices = controller.take_notices();
    if status != SessionStatus::Completed {
        return Err(notices.pop().unwrap_or_else(|| {
            Notice::new(NoticeKind::Validation, "Required", "Please provide patient name and MRI image.")
        }));
    }
    for notice in notices {
        eprintln!("{notice}");
    }

    let Some(completed) = controller.session().as_completed() else {
        return Err(Notice::new(NoticeKind::Transport, "Connection Error", "No result received"));
    };
    let result = completed.result;
    println!("Clinical Findings");
    println!("  Diagnosis:  {}", result.prediction.to_uppercase());
    println!("  Confidence: {}", result.confidence);
    println!("  Heatmap:    {}", resolve_heatmap_url(service.base_url(), &result.heatmap_url));

    if report {
        let exporter = exporter(service.clone())?;
        let doc = exporter.render(ReportSource::Session(completed));
        let path = exporter.export(&doc).await.map_err(|e| Notice::from(&e))?;
        println!("Report saved to {}", path.display());
    }
    Ok(())
}

async fn history(query: String, report: Option<i64>) -> Result<(), Notice> {
    let service = connect()?;
    let mut store = HistoryStore::new();

    store.refresh(service.as_ref()).await.map_err(|e| Notice::from(&e))?;
    store.set_query(query);

    println!("Clinical History: {} Total Scans", store.total());
    if store.visible_len() == 0 {
        println!("No records found.");
    }
    for record in store.visible() {
        println!(
            "  #{:<5} {:<24} {}  {}",
            record.id,
            record.patient_name,
            record.created_at.format("%a %b %d %Y"),
            record.summary_line()
        );
    }

    if let Some(id) = report {
        let record = store.find(id).ok_or_else(|| {
            Notice::new(NoticeKind::Export, "Report Error", format!("No record with id {id}"))
        })?;
        let exporter = exporter(service.clone())?;
        let doc = exporter.render(ReportSource::Record(record));
        let path = exporter.export(&doc).await.map_err(|e| Notice::from(&e))?;
        println!("Report saved to {}", path.display());
    }
    Ok(())
}

fn print_model_card() {
    let card = analytics::model_card();
    println!("MODEL VALIDATION");
    println!("{} | Dataset N={}", card.model_id, card.dataset_size);
    println!(
        "  Accuracy {}  Precision {:.2}  Recall {:.2}  F1-Score {:.2}",
        percent(card.accuracy),
        card.precision,
        card.recall,
        card.f1
    );
    println!("CLASS-SPECIFIC SENSITIVITY");
    for class in &card.classes {
        println!("  {:<12} {}", class.name, percent(class.recall));
    }
    if let Some(weakest) = card.weakest_class() {
        println!(
            "Critical confusion: {} ({} recall) is the primary clinical challenge.",
            weakest.name,
            percent(weakest.recall)
        );
    }
}
