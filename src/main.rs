use std::path::Path;

use log::error;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use pipeline_designer::app::DesignerApp;
use pipeline_designer::catalog::Catalog;

fn main() {
    let _ = TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    let module_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "modules.json".to_owned());
    let catalog = match Catalog::load(Path::new(&module_path)) {
        Ok(catalog) => catalog,
        Err(err) => {
            error!("cannot load module catalog from {module_path}: {err}");
            std::process::exit(1);
        }
    };

    let options = eframe::NativeOptions::default();
    let result = eframe::run_native(
        "AI Experiment Control System",
        options,
        Box::new(|_cc| Ok(Box::new(DesignerApp::new(catalog)))),
    );
    if let Err(err) = result {
        error!("{err}");
    }
}
