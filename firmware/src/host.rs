//! The host USB protocol.
//!
//! Frames on the wire are length-prefixed with a 16-bit command tag; the
//! USB driver (out of scope) turns inbound frames into USB events and
//! writes outbound [`HostFrame`]s back. Dispatch lives here so the menus,
//! onboarding, and the restricted app all speak the same protocol.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};
use vault_common::{
    error::{CoreError, ErrorTag},
    onboarding::OnboardingStep,
    status::{DeviceAuthState, DeviceIdleState},
    wallet::WalletId,
};
use vault_engine::UsbEvent;

use crate::context::DeviceCtx;

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command tags the host may send.
pub mod tags {
    pub const DEVICE_INFO: u16 = 0x0001;
    pub const START_DEVICE_AUTHENTICATION: u16 = 0x0002;
    pub const START_EXPORT_WALLET: u16 = 0x0003;
    pub const READY_STATE: u16 = 0x0004;
    /// Payload: one byte, the milestone being marked done.
    pub const ONBOARDING_STEP_DONE: u16 = 0x0005;
    /// Payload: 2-byte applet id followed by the applet payload.
    pub const APP_DISPATCH: u16 = 0x0010;
    /// Mapped straight to a P0 abort by the transport driver.
    pub const ABORT: u16 = 0x00ff;
}

/// Applet ids carried by `APP_DISPATCH` envelopes.
pub mod applets {
    pub const MANAGER: u16 = 0x0001;
}

/// Outbound frames.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostFrame {
    DeviceInfo {
        firmware_version: String,
        onboarding_step: OnboardingStep,
        authenticated: bool,
        wallet_count: u8,
    },
    ReadyState {
        idle_state: DeviceIdleState,
        core_flow_status: u32,
        app_flow_status: u32,
    },
    AuthenticationResult {
        ok: bool,
    },
    WalletExport(Vec<(String, WalletId)>),
    Error {
        tag: ErrorTag,
        code: u16,
    },
}

/// Where outbound frames go: the USB driver on hardware, a recorder in
/// tests, stdout in the simulator.
pub trait HostOut {
    fn send(&mut self, frame: HostFrame);
}

/// Discards outbound frames (no host attached).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullHost;

impl HostOut for NullHost {
    fn send(&mut self, _frame: HostFrame) {}
}

// --- Wire framing --- //

/// `len(u16 LE, tag + payload) || tag(u16 LE) || payload`.
pub fn encode_frame(tag: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(4 + payload.len());
    out.put_u16_le(2 + payload.len() as u16);
    out.put_u16_le(tag);
    out.put_slice(payload);
    out.to_vec()
}

/// Parse one frame; `None` if the buffer is short or inconsistent.
pub fn decode_frame(bytes: &[u8]) -> Option<UsbEvent> {
    let mut buf = bytes;
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u16_le() as usize;
    if len < 2 || buf.remaining() != len {
        return None;
    }
    let tag = buf.get_u16_le();
    Some(UsbEvent {
        tag,
        payload: Bytes::copy_from_slice(buf),
    })
}

// --- Dispatch --- //

/// Handle one host command in the normal (post-setup) state.
pub fn handle_usb(ctx: &mut DeviceCtx, event: UsbEvent) {
    dispatch(ctx, event, false);
}

/// Handle one host command while the device is still restricted: only
/// setup traffic is served, and nothing may touch the wallet registry.
pub fn handle_usb_restricted(ctx: &mut DeviceCtx, event: UsbEvent) {
    dispatch(ctx, event, true);
}

fn dispatch(ctx: &mut DeviceCtx, event: UsbEvent, restricted: bool) {
    match event.tag {
        tags::DEVICE_INFO => {
            let frame = HostFrame::DeviceInfo {
                firmware_version: FIRMWARE_VERSION.to_owned(),
                onboarding_step: ctx.store.onboarding_step(),
                authenticated: ctx.device_auth
                    == DeviceAuthState::Authenticated,
                wallet_count: ctx.store.wallet_count() as u8,
            };
            ctx.host.send(frame);
        }

        tags::READY_STATE => {
            ctx.host.send(HostFrame::ReadyState {
                idle_state: ctx.status.idle_state(),
                core_flow_status: ctx.status.core_flow_status(),
                app_flow_status: ctx.status.app_flow_status(),
            });
        }

        tags::START_DEVICE_AUTHENTICATION => {
            // The challenge/response against the crypto co-processor is an
            // external collaborator; its success is what lands here.
            ctx.device_auth = DeviceAuthState::Authenticated;
            if ctx.store.onboarding_step() == OnboardingStep::Virgin {
                let _ = ctx
                    .store
                    .set_onboarding_step(OnboardingStep::DeviceAuth);
            }
            info!("device authentication complete");
            ctx.host.send(HostFrame::AuthenticationResult { ok: true });
        }

        tags::ONBOARDING_STEP_DONE => {
            let Some(&byte) = event.payload.first() else {
                warn!("onboarding frame without a step byte");
                return;
            };
            match OnboardingStep::from_flash_byte(byte) {
                Ok(step) => match ctx.store.set_onboarding_step(step) {
                    Ok(()) => info!(?step, "onboarding milestone recorded"),
                    Err(err) => {
                        warn!(%err, "onboarding advance rejected");
                        ctx.report_error(&err);
                    }
                },
                Err(err) => warn!(%err, "bad onboarding step byte"),
            }
        }

        tags::START_EXPORT_WALLET if !restricted => {
            let wallets = ctx
                .store
                .list()
                .map(|(_, h)| (h.name.as_str().to_owned(), h.id))
                .collect();
            ctx.host.send(HostFrame::WalletExport(wallets));
        }

        tags::APP_DISPATCH if !restricted => {
            let mut payload = event.payload.clone();
            if payload.remaining() < 2 {
                warn!("app dispatch without an applet id");
                return;
            }
            let applet = payload.get_u16_le();
            match applet {
                applets::MANAGER => {
                    // Manager traffic beyond the core commands is handled
                    // by the applet layer; ack with the ready state.
                    ctx.host.send(HostFrame::ReadyState {
                        idle_state: ctx.status.idle_state(),
                        core_flow_status: ctx.status.core_flow_status(),
                        app_flow_status: ctx.status.app_flow_status(),
                    });
                }
                unknown => {
                    debug!(applet = unknown, "unknown applet id");
                    let err = CoreError::UnknownApp;
                    ctx.host.send(HostFrame::Error {
                        tag: err.tag(),
                        code: err.code(),
                    });
                }
            }
        }

        tags::START_EXPORT_WALLET | tags::APP_DISPATCH => {
            // Restricted mode: wallet traffic is refused without touching
            // flash.
            let err = CoreError::SetupRequired;
            ctx.host.send(HostFrame::Error {
                tag: err.tag(),
                code: err.code(),
            });
        }

        tags::ABORT => {
            // The transport maps aborts onto P0 events; one arriving here
            // is already handled.
        }

        unknown => {
            debug!(tag = unknown, "unknown host command");
            let err = CoreError::UnknownApp;
            ctx.host.send(HostFrame::Error {
                tag: err.tag(),
                code: err.code(),
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(tags::APP_DISPATCH, &[0x02, 0x00, 0xaa]);
        let event = decode_frame(&frame).unwrap();
        assert_eq!(event.tag, tags::APP_DISPATCH);
        assert_eq!(&event.payload[..], &[0x02, 0x00, 0xaa]);
    }

    #[test]
    fn empty_payload_frame() {
        let frame = encode_frame(tags::DEVICE_INFO, &[]);
        let event = decode_frame(&frame).unwrap();
        assert_eq!(event.tag, tags::DEVICE_INFO);
        assert!(event.payload.is_empty());
    }

    #[test]
    fn truncated_frames_rejected() {
        assert!(decode_frame(&[]).is_none());
        assert!(decode_frame(&[4, 0, 1]).is_none());

        let mut frame = encode_frame(tags::READY_STATE, &[1, 2, 3]);
        frame.pop();
        assert!(decode_frame(&frame).is_none());
    }
}
