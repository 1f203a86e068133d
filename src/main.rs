#[actix_web::main]
async fn main() -> std::io::Result<()> {
    runscript_orchestrator::run().await
}
