pub fn run() -> anyhow::Result<()> {
    println!("cascade {}", env!("CARGO_PKG_VERSION"));
    println!("Cost-aware cascading query router");
    Ok(())
}
