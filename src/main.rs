#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let token = doclookout::shutdown::create_shutdown_token();
    doclookout::monitor_documents(token).await;
}
