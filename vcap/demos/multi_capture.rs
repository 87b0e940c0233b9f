use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use vcap::prelude::*;
use vcap_simulation::{SimDriver, SimSpec};

struct Args {
    config: Option<PathBuf>,
    seconds: u64,
    sim: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        seconds: 5,
        sim: false,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--sim" => args.sim = true,
            "--seconds" => {
                let value = it.next().context("--seconds needs a value")?;
                args.seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds '{}'", value))?;
            }
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            path => args.config = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    println!("=== vcap multi-device capture ===");

    let args = parse_args()?;

    // 1. 配置：JSON 文件，或者默认的 6 路 UYVY 640x480
    let config = match &args.config {
        Some(path) => MultiCaptureConfig::from_json_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => MultiCaptureConfig::uniform(
            (0..6).map(|i| format!("/dev/video{}", i)),
            &CaptureConfig::new("").strategy(TransferStrategy::UserPtr),
        ),
    };

    // 2. 驱动
    let driver: Arc<dyn Driver> = if args.sim {
        let sim = SimDriver::new();
        for device in &config.devices {
            sim.add_device(device.device.clone(), SimSpec::default());
        }
        Arc::new(sim)
    } else {
        default_driver()?
    };
    println!("Backend: {}", driver.name());

    // 3. 初始化，失败的设备跳过
    let mut capture = MultiCapture::new(driver);
    let ready = capture.initialize_all(&config);
    if !ready.iter().any(|&ok| ok) {
        bail!("No device could be initialized");
    }

    // 4. 采集
    capture.start_all(ConvertSink::for_config);
    println!("Capturing for {} seconds...", args.seconds);
    std::thread::sleep(Duration::from_secs(args.seconds));

    // 5. 停止并汇总
    let reports = capture.shutdown();
    println!("=== Summary ===");
    for report in &reports {
        println!("{}", report);
    }

    let failed = reports.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        println!("{} of {} devices failed", failed, reports.len());
    }
    Ok(())
}
