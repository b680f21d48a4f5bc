use std::time::{Duration, Instant};

use ember_fnd::logger::QueryLogger;
use ember_fnd::{AppContext, ConfigStore, Field};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let log_file = dir.path().join("logs/app.log");
    std::fs::write(
        dir.path().join(".env"),
        format!(
            "APP.NAME=quickstart\nAPP.ENV=local\nLOG.LEVEL=debug\nLOG.FILENAME='{}'\nDB.SLOW_THRESHOLD_MS=5\n",
            log_file.display()
        ),
    )?;

    // Logger settings come from the store's log.* keys
    let ctx = AppContext::builder()
        .with_config(
            ConfigStore::builder()
                .with_dir(dir.path())
                .watch(false)
                .init("")?,
        )
        .build()?;

    let config = ctx.config();
    ctx.logger().info(
        "started",
        &[Field::new("app", config.get_string("app.name"))],
    );

    let db = ctx.query_logger();
    let begin = Instant::now() - Duration::from_millis(20);
    db.trace(
        begin,
        &|| ("SELECT id FROM users WHERE active".to_string(), 3),
        None,
    );

    println!("--- {} ---", log_file.display());
    print!("{}", std::fs::read_to_string(&log_file)?);

    Ok(())
}
