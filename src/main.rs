#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use {defmt_rtt as _, panic_probe as _};

use hitec_dservo::{
    tasks::{monitor_task, servo_task},
    Board, HitecDServo,
};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting hitec-dservo bench firmware");
    let board = Board::init();
    let servo = HitecDServo::new(board.timing);

    unwrap!(spawner.spawn(servo_task(servo, board.servo_line)));
    info!("Servo task spawned");

    unwrap!(spawner.spawn(monitor_task()));

    core::future::pending::<()>().await;
}
