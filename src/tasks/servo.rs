use embassy_executor::task;
use embassy_time::{Duration, Ticker};
use heapless::Vec;

use crate::board::{BoardServo, ServoPin};
use crate::config::MONITOR_PERIOD_MS;
use crate::drivers::servo::{protocol::SERVO_REGS, Error, ServoConfig};
use crate::ipc::{
    CONFIG_REPLY_CH, DUMP_REPLY_CH, MODEL_REPLY_CH, POSITION_REPLY_CH, SERVO_CH, SERVO_REPLY_CH,
};

pub const REGISTER_DUMP_MAX: usize = 16;
pub type RegisterDump = Vec<(u8, u16), REGISTER_DUMP_MAX>;

type OneShotSender<T> = embassy_sync::channel::Sender<
    'static,
    embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex,
    T,
    1,
>;

pub enum Command {
    Identify {
        reply: OneShotSender<Result<u16, Error>>,
    },
    ReadPosition {
        reply: OneShotSender<Result<i32, Error>>,
    },
    WriteTarget {
        micros: i32,
        reply: OneShotSender<Result<(), Error>>,
    },
    ReadConfig {
        reply: OneShotSender<Result<ServoConfig, Error>>,
    },
    WriteConfig {
        config: ServoConfig,
        reply: OneShotSender<Result<(), Error>>,
    },
    Dump {
        reply: OneShotSender<Result<RegisterDump, Error>>,
    },
}

/// Owns the servo. Everything else reaches it through `SERVO_CH`.
#[task]
pub async fn servo_task(mut servo: BoardServo, line: ServoPin) {
    info!("starting servo task");
    if let Err(e) = servo.attach(line) {
        warn!("servo not identified: {} ({})", e, e.remedy());
    }

    loop {
        match SERVO_CH.receive().await {
            Command::Identify { reply } => {
                let _ = reply.send(servo.read_model_number()).await;
            }
            Command::ReadPosition { reply } => {
                let _ = reply.send(servo.read_current_microseconds()).await;
            }
            Command::WriteTarget { micros, reply } => {
                let res = servo.write_target_microseconds(micros);
                let _ = reply.send(res).await;
            }
            Command::ReadConfig { reply } => {
                let _ = reply.send(servo.read_config()).await;
            }
            Command::WriteConfig { config, reply } => {
                info!("REQ: write config");
                let res = servo.write_config(&config);
                let _ = reply.send(res).await;
            }
            Command::Dump { reply } => {
                let mut dump = RegisterDump::new();
                let res = servo.read_register_dump(&mut dump).map(|_| dump);
                let _ = reply.send(res).await;
            }
        }
    }
}

/// Identify the servo, log its settings once, then report position at a
/// fixed rate.
#[task]
pub async fn monitor_task() {
    SERVO_CH
        .send(Command::Identify {
            reply: MODEL_REPLY_CH.sender(),
        })
        .await;
    match MODEL_REPLY_CH.receive().await {
        Ok(model) => info!("servo model {}", model),
        Err(e) => warn!("identify failed: {} ({})", e, e.remedy()),
    }

    SERVO_CH
        .send(Command::ReadConfig {
            reply: CONFIG_REPLY_CH.sender(),
        })
        .await;
    match CONFIG_REPLY_CH.receive().await {
        Ok(config) => info!("config: {}", config),
        Err(e) => warn!("read config failed: {} ({})", e, e.remedy()),
    }

    SERVO_CH
        .send(Command::Dump {
            reply: DUMP_REPLY_CH.sender(),
        })
        .await;
    match DUMP_REPLY_CH.receive().await {
        Ok(dump) => {
            for &(addr, value) in dump.iter() {
                let name = SERVO_REGS
                    .iter()
                    .find(|r| r.addr == addr)
                    .map_or("?", |r| r.name);
                info!("  {:#x} {=str}: {}", addr, name, value);
            }
        }
        Err(e) => warn!("register dump failed: {}", e),
    }

    // leave the horn centred before watching it
    SERVO_CH
        .send(Command::WriteTarget {
            micros: 1500,
            reply: SERVO_REPLY_CH.sender(),
        })
        .await;
    if let Err(e) = SERVO_REPLY_CH.receive().await {
        warn!("centre failed: {}", e);
    }

    let mut ticker = Ticker::every(Duration::from_millis(MONITOR_PERIOD_MS));
    loop {
        ticker.next().await;
        SERVO_CH
            .send(Command::ReadPosition {
                reply: POSITION_REPLY_CH.sender(),
            })
            .await;
        match POSITION_REPLY_CH.receive().await {
            Ok(us) => info!("position {}us", us),
            Err(e) => warn!("position read failed: {} ({})", e, e.remedy()),
        }
    }
}
