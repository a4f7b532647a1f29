#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::cell::RefCell;

use beacon_core::fault::{FaultIndicator, FaultSignal};
use beacon_core::radio::initialize_stack;
use beacon_core::{BringUp, HciController, StackEvents, TimeSyncClient};
use beacon_firmware::fault_store::{self, PersistentFaultReporter};
use beacon_firmware::provisioning::{self, KEY_SIZE};
use embassy_executor::Spawner;
use embassy_futures::join::join;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::timer::timg::TimerGroup;
use esp_radio::ble::controller::BleConnector;
use log::{error, info, warn};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// One-shot notifications from the radio stack to the bring-up sequence
static STACK_EVENTS: StackEvents = StackEvents::new();

/// Wakes the fault LED task
static FAULTS: FaultSignal = FaultSignal::new();

#[embassy_executor::task]
async fn fault_led_task(led: Output<'static>) -> ! {
    FaultIndicator::new(led, embassy_time::Delay)
        .run(&FAULTS)
        .await
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    if let Some(previous) = fault_store::take_previous() {
        warn!(
            "Previous boot stopped with {} at {:?} (detail {})",
            previous.code.label(),
            previous.state,
            previous.detail
        );
    }

    let led = Output::new(peripherals.GPIO21, Level::Low, OutputConfig::default());
    spawner.must_spawn(fault_led_task(led));

    let radio_init = esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller");
    let connector = BleConnector::new(&radio_init, peripherals.BT, Default::default())
        .expect("Failed to initialize BLE controller");

    let bring_up_config = provisioning::bring_up_config();
    let hci = RefCell::new(HciController::new(connector, &bring_up_config.advertising));
    let mut faults = PersistentFaultReporter::new(&FAULTS);

    let mut bring_up = BringUp::<_, _, _, KEY_SIZE>::new(
        provisioning::ENCODED_KEY,
        bring_up_config,
        TimeSyncClient::<KEY_SIZE>::new(),
        &hci,
        &mut faults,
    );

    // Stack init fires the one-shot event the sequence is waiting on
    let stack = async {
        let mut controller = hci.borrow_mut();
        // Failures are delivered to the sequencer as a critical error event
        let _ = initialize_stack(&mut controller, &STACK_EVENTS).await;
    };
    let ((), result) = join(stack, bring_up.run(&STACK_EVENTS)).await;

    match result {
        Ok(()) => info!("Node is advertising"),
        Err(e) => error!("Bring-up failed, node will not advertise: {}", e),
    }

    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
