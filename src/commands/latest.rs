use crate::error::AppError;
use crate::services::TimeSeriesStore;
use crate::utils::get_data_dir;
use std::path::PathBuf;

pub async fn run(dataset: String, data_dir: Option<PathBuf>) {
    let store = TimeSeriesStore::new(data_dir.unwrap_or_else(get_data_dir));

    let path = match store.latest_path(&dataset).await {
        Ok(path) => path,
        Err(AppError::NotFound(_)) => {
            eprintln!("⚠️  No data stored for '{}' under {}", dataset, store.root().display());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    match store.read_latest(&dataset).await {
        Ok(payload) => {
            eprintln!("📄 {}", path.display());
            match serde_json::to_string_pretty(&payload) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("❌ Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}
