fn setup_environment() {
    std::env::remove_var("PYTHONHOME");
    std::env::remove_var("PYTHONPATH");
}

#[tokio::main]
async fn main() {
    setup_environment();
    if let Err(e) = medialoader_lib::run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
