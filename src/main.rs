#[tokio::main]
async fn main() {
    if let Err(e) = caresync::run().await {
        eprintln!("caresync: {e}");
        std::process::exit(1);
    }
}
