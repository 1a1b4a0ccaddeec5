//! Appliance demo: mock temperature sensor driving the log alarm
//!
//! The sensor replays a fixed reading sequence that crosses the fire
//! threshold once per cycle; every crossing ends up as a fire notice in the
//! log. With `--config` the visual classifier is also set up, as the
//! appliance does at boot.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use flame_core::appliance::{
    Alarm, FireDetector, LogAlarm, MockTemperatureSensor, Sensor, TemperatureSensor, DEFAULT_FIRE_CELSIUS,
};
use flame_core::{ClassifierConfig, ShuffleNetClassifier, VisualClassifier};
use log::info;

#[derive(Parser, Debug)]
#[command(name = "siren")]
#[command(about = "Run the mock sensor and log alarm for a while")]
struct Cli {
    /// How long to run
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Sensor period / alarm poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    period_ms: u64,

    /// Temperature (°C) above which the alarm goes off
    #[arg(long, default_value_t = DEFAULT_FIRE_CELSIUS)]
    threshold: f32,

    /// Classifier configuration; when given the classifier is loaded too
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    let cli = Cli::parse();
    let period = Duration::from_millis(cli.period_ms);

    let mut classifier = ShuffleNetClassifier::new();
    if let Some(path) = &cli.config {
        let mut config = ClassifierConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?;
        config.apply_env_overrides();
        classifier.setup(&config).context("classifier setup failed")?;
    }

    let alarm = Arc::new(LogAlarm::with_poll(period));
    let sensor = Arc::new(MockTemperatureSensor::with_period(period));
    let detector = Arc::new(FireDetector::new(classifier, alarm.clone()).with_threshold(cli.threshold));
    sensor.set_celsius_receiver(detector.celsius_receiver());

    let alarm_thread = {
        let alarm = Arc::clone(&alarm);
        thread::spawn(move || alarm.run())
    };
    let sensor_thread = {
        let sensor = Arc::clone(&sensor);
        thread::spawn(move || sensor.run())
    };
    info!("running for {}s, threshold {:.1} C", cli.seconds, detector.threshold_celsius());

    thread::sleep(Duration::from_secs(cli.seconds));
    sensor.close();
    alarm.close();
    sensor_thread.join().map_err(|_| anyhow!("sensor thread panicked"))?;
    alarm_thread.join().map_err(|_| anyhow!("alarm thread panicked"))?;

    info!("{} fire notices delivered", alarm.delivered());
    Ok(())
}
