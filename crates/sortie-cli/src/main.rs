use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use sortie_fc::{
    run_fc_autodetect, Connection, FcConfig, MavVehicle, SyncController, SyncReport, VehicleHandle,
    WaitConfig,
};
use sortie_proto::{Command, CommandSpec};
use sortie_sim::{SimConfig, SimVehicle};

#[derive(Debug, Parser)]
#[command(
    name = "sortie",
    version,
    about = "Sortie - mission upload/download verification for MAVLink vehicles"
)]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Check the config file without touching a vehicle.
    Doctor,
    Fc {
        #[command(subcommand)]
        cmd: FcCmd,
    },
    Mission {
        #[command(subcommand)]
        cmd: MissionCmd,
    },
    Params {
        #[command(subcommand)]
        cmd: ParamsCmd,
    },
    /// Print the vehicle's current flight mode.
    Mode {
        #[arg(long)]
        sim: bool,
    },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Try candidate connection urls for a MAVLink heartbeat.
    Autodetect,
    /// Connect, wait for a heartbeat and print link status.
    Status,
}

#[derive(Debug, Subcommand)]
enum MissionCmd {
    /// Upload [mission.commands], download them back and compare.
    Verify {
        #[arg(long)]
        sim: bool,
        #[arg(long)]
        json: bool,
    },
    /// Download and print the stored mission.
    Show {
        #[arg(long)]
        sim: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ParamsCmd {
    Get {
        name: String,
        #[arg(long)]
        sim: bool,
    },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    fc: Option<FcConfig>,
    #[serde(default)]
    mission: MissionCfg,
    sim: Option<SimConfig>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct MissionCfg {
    wait_valid_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    commands: Vec<CommandSpec>,
}

impl MissionCfg {
    fn wait(&self) -> WaitConfig {
        let d = WaitConfig::default();
        WaitConfig {
            timeout: self
                .wait_valid_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.timeout),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.poll_interval),
        }
    }

    fn commands(&self) -> Result<Vec<Command>> {
        self.commands
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                Command::new(spec.clone()).with_context(|| format!("mission.commands[{}]", i))
            })
            .collect()
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Cmd::Doctor => doctor(&cfg)?,
        Cmd::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
        Cmd::Mission { cmd } => mission_cmd(&cfg, cmd).await?,
        Cmd::Params { cmd } => params_cmd(&cfg, cmd).await?,
        Cmd::Mode { sim } => mode_cmd(&cfg, sim).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    if let Some(fc) = &cfg.fc {
        if fc.autodetect {
            info!("doctor: fc autodetect enabled (OK)");
        } else {
            anyhow::ensure!(
                fc.url.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
                "fc.url missing"
            );
        }
        anyhow::ensure!(fc.sys_id != fc.target_sys, "fc.sys_id must differ from fc.target_sys");
        anyhow::ensure!(
            fc.send_heartbeat_hz.unwrap_or(1.0) > 0.0,
            "fc.send_heartbeat_hz must be > 0"
        );
    } else {
        warn!("doctor: no [fc] section, only --sim commands will work");
    }

    let wait = cfg.mission.wait();
    anyhow::ensure!(!wait.poll_interval.is_zero(), "mission.poll_interval_ms must be > 0");
    anyhow::ensure!(
        wait.timeout > wait.poll_interval,
        "mission.wait_valid_timeout_ms must exceed poll_interval_ms"
    );

    let commands = cfg.mission.commands()?;
    if commands.is_empty() {
        warn!("doctor: [mission] has no commands, verify will only check home");
    }
    info!("doctor: {} mission commands valid", commands.len());

    info!("doctor: OK");
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    let fc = cfg.fc.as_ref().context("no [fc] config section")?;
    match cmd {
        FcCmd::Autodetect => {
            let res = run_fc_autodetect(fc)?;
            match res.chosen {
                Some(url) => println!("CHOSEN: {}", url),
                None => println!("CHOSEN: none"),
            }
            for p in res.attempts {
                println!(
                    "attempt url={} hb={} sys={:?} {}ms note={}",
                    p.url, p.hb_seen, p.sys_id, p.elapsed_ms, p.note
                );
            }
            Ok(())
        }
        FcCmd::Status => {
            let conn = Connection::open(fc)?;
            if let Err(e) = conn.wait_vehicle(fc.target_sys, fc.heartbeat_timeout()).await {
                warn!("fc status: {:#}", e);
            }
            let st = conn.status();
            println!("connected={}", st.connected);
            println!("url={}", conn.url());
            println!("last_heartbeat_age={:?}", st.hb_age());
            println!("last_msg={:?}", st.last_msg);
            println!("vehicles={:?}", conn.vehicles());
            if let Some(e) = st.link_error {
                println!("link_error={}", e);
            }
            Ok(())
        }
    }
}

async fn mission_cmd(cfg: &Config, cmd: MissionCmd) -> Result<()> {
    match cmd {
        MissionCmd::Verify { sim, json } => {
            let commands = cfg.mission.commands()?;
            let report = if sim {
                let mut v = sim_vehicle(cfg)?;
                verify(&mut v, &commands).await?
            } else {
                let (_conn, mut v) = fc_vehicle(cfg).await?;
                verify(&mut v, &commands).await?
            };
            print_report(&report, json)
        }
        MissionCmd::Show { sim } => {
            if sim {
                show(&mut sim_vehicle(cfg)?).await
            } else {
                let (_conn, mut v) = fc_vehicle(cfg).await?;
                show(&mut v).await
            }
        }
    }
}

async fn params_cmd(cfg: &Config, cmd: ParamsCmd) -> Result<()> {
    match cmd {
        ParamsCmd::Get { name, sim } => {
            let params = if sim {
                sim_vehicle(cfg)?.parameters()
            } else {
                let (_conn, v) = fc_vehicle(cfg).await?;
                let fc = cfg.fc.as_ref().context("no [fc] config section")?;
                let n = v.fetch_parameters(fc.param_timeout()).await?;
                info!("params: {} received", n);
                v.parameters()
            };
            let value = params.get(&name).with_context(|| format!("parameter {} not found", name))?;
            println!("{} = {}", name, value);
            Ok(())
        }
    }
}

async fn mode_cmd(cfg: &Config, sim: bool) -> Result<()> {
    let (mode, armed) = if sim {
        (sim_vehicle(cfg)?.mode(), None)
    } else {
        let (_conn, v) = fc_vehicle(cfg).await?;
        (v.mode(), v.armed())
    };
    let mode = mode.context("vehicle not connected")?;
    println!("mode={} ({:?})", mode.name(), mode);
    if let Some(armed) = armed {
        println!("armed={}", armed);
    }
    Ok(())
}

async fn verify<V: VehicleHandle>(vehicle: &mut V, commands: &[Command]) -> Result<SyncReport> {
    let mut ctl = SyncController::new(vehicle);
    let report = ctl.run(commands).await.context("mission round trip")?;
    Ok(report)
}

async fn show<V: VehicleHandle>(vehicle: &mut V) -> Result<()> {
    let list = vehicle.commands();
    list.download()?;
    list.wait_valid().await?;
    for cmd in list.iter() {
        println!("{}", cmd);
    }
    Ok(())
}

#[derive(Serialize)]
struct VerifyOutput<'a> {
    ts_unix_ms: i64,
    verified: bool,
    #[serde(flatten)]
    report: &'a SyncReport,
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        let out = VerifyOutput {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            verified: true,
            report,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("VERIFIED: {} commands + home in {:?}", report.uploaded, report.elapsed);
    for cmd in &report.downloaded {
        println!("{}", cmd);
    }
    Ok(())
}

fn sim_vehicle(cfg: &Config) -> Result<SimVehicle> {
    let sim = cfg.sim.clone().unwrap_or_default();
    Ok(SimVehicle::new(&sim, cfg.mission.wait())?)
}

// The connection must outlive the vehicle; callers keep both.
async fn fc_vehicle(cfg: &Config) -> Result<(Connection, MavVehicle)> {
    let fc = cfg.fc.as_ref().context("no [fc] config section")?;
    let conn = Connection::open(fc)?;
    conn.wait_vehicle(fc.target_sys, fc.heartbeat_timeout()).await?;
    let vehicle = conn.vehicle(fc.target_sys, fc.target_comp, cfg.mission.wait());
    Ok((conn, vehicle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> Config {
        toml::from_str(include_str!("../sortie.example.toml")).unwrap()
    }

    #[test]
    fn example_config_passes_doctor() {
        let cfg = example();
        doctor(&cfg).unwrap();
        assert_eq!(cfg.mission.commands().unwrap().len(), 4);
        assert_eq!(cfg.mission.wait().timeout, Duration::from_millis(15_000));
        assert_eq!(cfg.sim.as_ref().unwrap().params["THR_MIN"], 130.0);
    }

    #[test]
    fn bad_command_is_reported_with_index() {
        let cfg: Config = toml::from_str(
            r#"
            [[mission.commands]]
            command = "takeoff"
            z = 10.0

            [[mission.commands]]
            frame = "global"
            x = 95.0
            "#,
        )
        .unwrap();
        let err = cfg.mission.commands().unwrap_err();
        assert!(format!("{:#}", err).contains("mission.commands[1]"));
        assert!(doctor(&cfg).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sim_verify_reports_home_first() {
        let cfg = example();
        let mut v = sim_vehicle(&cfg).unwrap();
        let report = verify(&mut v, &cfg.mission.commands().unwrap()).await.unwrap();
        assert_eq!(report.uploaded, 4);
        assert_eq!(report.downloaded.len(), 5);
        assert_eq!(report.home.seq(), 0);
    }
}
