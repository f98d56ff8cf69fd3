//! Dispatcher of the Monitor/Drive workflow.
//!
//! Timer-free: outgoing traffic is derived from what was just received.
//! The one-shot values (firmware version, then git hash) are inquired
//! early after startup; Charge Control frames are emitted either
//! triggered by each received Charge State frame or manually.

use log::debug;

use super::frame;
use super::state::SafetyController;
use super::Com;
use crate::error::Result;
use crate::uart::SerialLink;

/// Pending inquiry and auto-send bookkeeping of one monitor session.
pub struct Monitor {
    /// Whether Charge Control frames follow each received Charge State
    /// frame automatically.
    pub auto_send: bool,

    fw_version_requested: bool,
    fw_version_received: bool,
    git_hash_requested: bool,
    git_hash_received: bool,

    /// COM of the frame handled last, controls the triggered send.
    last_com: Option<Com>,
}

impl Monitor {
    pub fn new(auto_send: bool) -> Self {
        Monitor {
            auto_send,
            fw_version_requested: false,
            fw_version_received: false,
            git_hash_requested: false,
            git_hash_received: false,
            last_com: None,
        }
    }

    pub fn toggle_auto_send(&mut self) {
        self.auto_send = !self.auto_send;
    }

    /// True once both one-shot inquiries have been answered.
    pub fn one_shots_done(&self) -> bool {
        self.fw_version_received && self.git_hash_received
    }

    /// Sends the Charge Control frame matching the current mode, stamping
    /// the transmit time in the model.
    pub fn send_charge_control<L: SerialLink>(
        &mut self,
        link: &mut L,
        ctx: &mut SafetyController,
    ) -> Result<()> {
        let com = if ctx.is_mcs() {
            Com::ChargeControl2
        } else {
            Com::ChargeControl
        };

        ctx.record_timestamp(com);
        frame::send(link, com, ctx.charge_control.raw())
    }

    /// One dispatch step before blocking for input: emits the pending
    /// inquiry, or the triggered Charge Control frame.
    pub fn pump<L: SerialLink>(
        &mut self,
        link: &mut L,
        ctx: &mut SafetyController,
    ) -> Result<()> {
        if !self.fw_version_requested {
            frame::send_inquiry(link, Com::FwVersion)?;
            self.fw_version_requested = true;
        } else if !self.git_hash_requested && self.fw_version_received {
            frame::send_inquiry(link, Com::GitHash)?;
            self.git_hash_requested = true;

            // don't wait for the next state frame to resume the
            // periodic control traffic
            if self.auto_send {
                self.send_charge_control(link, ctx)?;
            }
        } else if matches!(self.last_com, Some(Com::ChargeState) | Some(Com::ChargeState2))
            && self.auto_send
        {
            self.send_charge_control(link, ctx)?;
        }

        Ok(())
    }

    /// Feeds one received frame into the model.
    pub fn handle_frame(&mut self, ctx: &mut SafetyController, com: u8, data: u64) {
        let com = match Com::try_from(com) {
            Ok(com) => com,
            Err(_) => {
                debug!("ignoring frame with unknown COM 0x{com:02x}");
                return;
            }
        };

        ctx.apply_frame(com, data);

        match com {
            Com::FwVersion => self.fw_version_received = true,
            Com::GitHash => self.git_hash_received = true,
            _ => {}
        }

        self.last_com = Some(com);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cb::frame::FRAME_LEN;
    use crate::uart::testing::MockLink;

    fn tx_frames(link: &MockLink) -> Vec<&[u8]> {
        link.tx.chunks(FRAME_LEN).collect()
    }

    #[test]
    fn fw_version_inquiry_comes_first() {
        let mut link = MockLink::new();
        let mut ctx = SafetyController::new();
        let mut monitor = Monitor::new(true);

        monitor.pump(&mut link, &mut ctx).unwrap();

        let frames = tx_frames(&link);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], 0xff);
        assert_eq!(frames[0][2], u8::from(Com::FwVersion));

        // nothing further until the answer arrives
        monitor.pump(&mut link, &mut ctx).unwrap();
        assert_eq!(tx_frames(&link).len(), 1);
    }

    #[test]
    fn git_hash_follows_fw_version_answer() {
        let mut link = MockLink::new();
        let mut ctx = SafetyController::new();
        let mut monitor = Monitor::new(false);

        monitor.pump(&mut link, &mut ctx).unwrap();
        monitor.handle_frame(&mut ctx, u8::from(Com::FwVersion), 0x81u64 << 32);
        monitor.pump(&mut link, &mut ctx).unwrap();

        let frames = tx_frames(&link);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1][1], 0xff);
        assert_eq!(frames[1][2], u8::from(Com::GitHash));
    }

    #[test]
    fn charge_state_triggers_charge_control() {
        let mut link = MockLink::new();
        let mut ctx = SafetyController::new();
        let mut monitor = Monitor::new(true);

        monitor.pump(&mut link, &mut ctx).unwrap();
        monitor.handle_frame(&mut ctx, u8::from(Com::FwVersion), 0);
        monitor.pump(&mut link, &mut ctx).unwrap();

        ctx.set_pwm(true, 50);
        monitor.handle_frame(&mut ctx, u8::from(Com::ChargeState), 0);
        monitor.pump(&mut link, &mut ctx).unwrap();

        let frames = tx_frames(&link);
        // inquiry, inquiry + triggered control, triggered control
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[2][1], u8::from(Com::ChargeControl));
        assert_eq!(frames[3][1], u8::from(Com::ChargeControl));
        assert_eq!(frames[3][2], 0x80 | 0x00);
        assert_eq!(frames[3][3], 0x32);
    }

    #[test]
    fn charge_state2_switches_to_mcs_control() {
        let mut link = MockLink::new();
        let mut ctx = SafetyController::new();
        let mut monitor = Monitor::new(true);

        monitor.pump(&mut link, &mut ctx).unwrap();
        monitor.handle_frame(&mut ctx, u8::from(Com::FwVersion), 0);
        monitor.pump(&mut link, &mut ctx).unwrap();

        monitor.handle_frame(&mut ctx, u8::from(Com::ChargeState2), 0);
        monitor.pump(&mut link, &mut ctx).unwrap();

        let frames = tx_frames(&link);
        assert_eq!(frames.last().unwrap()[1], u8::from(Com::ChargeControl2));
        assert!(ctx.is_mcs());
    }

    #[test]
    fn auto_send_off_suppresses_control_frames() {
        let mut link = MockLink::new();
        let mut ctx = SafetyController::new();
        let mut monitor = Monitor::new(false);

        monitor.pump(&mut link, &mut ctx).unwrap();
        monitor.handle_frame(&mut ctx, u8::from(Com::FwVersion), 0);
        monitor.pump(&mut link, &mut ctx).unwrap();
        monitor.handle_frame(&mut ctx, u8::from(Com::ChargeState), 0);
        monitor.pump(&mut link, &mut ctx).unwrap();

        // the two inquiries only
        assert_eq!(tx_frames(&link).len(), 2);
    }

    #[test]
    fn unknown_com_is_ignored() {
        let mut link = MockLink::new();
        let mut ctx = SafetyController::new();
        let mut monitor = Monitor::new(true);

        monitor.pump(&mut link, &mut ctx).unwrap();
        monitor.handle_frame(&mut ctx, 0x0c, 0xdead);
        monitor.pump(&mut link, &mut ctx).unwrap();

        // no state applied, no control frame triggered
        assert_eq!(tx_frames(&link).len(), 1);
    }
}
