//! `vaultd`: the device simulator.
//!
//! Runs the full firmware core on a workstation: file-backed flash under
//! `./vault-data`, an in-memory deck of four cards, screens printed to
//! stdout, and user input read from stdin.
//!
//! Input commands:
//!   c / confirm        r / reject        s / skip
//!   n <index>          t <text>          tap <card 1-4>
//!   usb auth | usb info | usb ready | usb onboard <step> | usb export
//!   abort              quit

use std::io::BufRead;

use anyhow::Context;
use firmware::{
    context::DeviceCtx,
    host::{self, HostFrame, HostOut},
    initial_step,
};
use tracing::warn;
use vault_card::mock::MockDeck;
use vault_common::{
    card::{CardNumber, FamilyId},
    rng::SysRng,
    secret::SecretString,
    status::CoreStatus,
    ui::{Screen, UiHost},
};
use vault_engine::{Engine, EventBus, EventSenders, UiEvent, UsbEvent};
use vault_store::{flash::FileFlash, WalletStore};

/// Screens go straight to stdout.
struct PrintUi;

impl UiHost for PrintUi {
    fn render(&mut self, screen: Screen) {
        match screen {
            Screen::Message { text } => println!("[screen] {text}"),
            Screen::Instruction { heading, body } =>
                println!("[screen] {heading} / {body}"),
            Screen::Confirm { prompt } =>
                println!("[screen] {prompt} (c/r)"),
            Screen::TextInput { prompt, .. } =>
                println!("[screen] {prompt} (t <text>)"),
            Screen::List { heading, items } => {
                println!("[screen] {heading}:");
                for (i, item) in items.iter().enumerate() {
                    println!("  {i}: {item}");
                }
            }
            Screen::Slideshow { slides } =>
                for slide in slides {
                    println!("[screen] {slide}");
                },
            Screen::Error { text } => println!("[screen] ERROR: {text}"),
        }
    }
}

/// Host frames go to stdout too.
struct PrintHost;

impl HostOut for PrintHost {
    fn send(&mut self, frame: HostFrame) {
        println!("[host] {frame:?}");
    }
}

fn main() -> anyhow::Result<()> {
    logger::init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to build the runtime")?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let flash =
        FileFlash::new("./vault-data").context("flash dir unavailable")?;
    let bus = EventBus::new();
    let deck = MockDeck::new(FamilyId(*b"SIM1"), bus.senders());

    let mut ctx = DeviceCtx {
        store: WalletStore::load(
            Box::new(flash) as Box<dyn vault_store::flash::FlashBackend>
        )
        .map_err(|err| anyhow::anyhow!("flash load failed: {err}"))?,
        transport: Box::new(deck.transport()),
        ui: Box::new(PrintUi),
        rng: Box::new(SysRng::new()),
        bus,
        host: Box::new(PrintHost),
        status: CoreStatus::new(),
        device_auth: Default::default(),
        menu_refresh: true,
    };

    let senders = ctx.bus.senders();
    std::thread::spawn(move || stdin_loop(senders, deck));

    let mut engine = Engine::new();
    engine.push(initial_step(&ctx));
    engine.run(&mut ctx).await;
    Ok(())
}

fn stdin_loop(senders: EventSenders, deck: MockDeck) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { continue };

        match cmd {
            "c" | "confirm" => senders.ui(UiEvent::Confirm),
            "r" | "reject" => senders.ui(UiEvent::Reject),
            "s" | "skip" => senders.ui(UiEvent::Skip),
            "n" | "choose" => {
                if let Some(Ok(i)) = parts.next().map(str::parse) {
                    senders.ui(UiEvent::ListChoice(i));
                }
            }
            "t" | "text" => {
                let rest = parts.collect::<Vec<_>>().join(" ");
                senders
                    .ui(UiEvent::TextInput(SecretString::new(rest)));
            }
            "tap" => {
                match parts.next().map(str::parse::<u8>) {
                    Some(Ok(n)) => match CardNumber::new(n) {
                        Ok(card) => deck.tap(card),
                        Err(err) => warn!(%err, "bad card number"),
                    },
                    _ => warn!("usage: tap <1-4>"),
                }
            }
            "usb" => {
                let tag = match parts.next() {
                    Some("info") => host::tags::DEVICE_INFO,
                    Some("auth") => host::tags::START_DEVICE_AUTHENTICATION,
                    Some("ready") => host::tags::READY_STATE,
                    Some("export") => host::tags::START_EXPORT_WALLET,
                    Some("onboard") => host::tags::ONBOARDING_STEP_DONE,
                    other => {
                        warn!(?other, "unknown usb command");
                        continue;
                    }
                };
                let payload = match parts.next().map(str::parse::<u8>) {
                    Some(Ok(byte)) => bytes::Bytes::copy_from_slice(&[byte]),
                    _ => bytes::Bytes::new(),
                };
                senders.usb(UsbEvent { tag, payload });
            }
            "abort" => senders.abort(),
            "quit" | "q" => std::process::exit(0),
            other => warn!(other, "unknown command"),
        }
    }
}
