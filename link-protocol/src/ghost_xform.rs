/// Affine map between a peer's local monotonic host time and the
/// session-wide virtual "ghost" time: `ghost = round(slope * host) +
/// intercept`. Learned per-peer from ping/pong measurement (see
/// `link-core`'s Kalman filter) and otherwise held at the identity
/// transform.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GhostXForm {
    pub slope: f64,
    pub intercept_micros: i64,
}

impl GhostXForm {
    /// Identity transform anchored so that ghost time reads zero at
    /// `host_now`.
    pub fn identity_at(host_now_micros: i64) -> Self {
        GhostXForm {
            slope: 1.0,
            intercept_micros: -host_now_micros,
        }
    }

    pub fn host_to_ghost(self, host_micros: i64) -> i64 {
        (self.slope * host_micros as f64).round() as i64 + self.intercept_micros
    }

    pub fn ghost_to_host(self, ghost_micros: i64) -> i64 {
        ((ghost_micros - self.intercept_micros) as f64 / self.slope).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_reads_zero_at_anchor() {
        let xform = GhostXForm::identity_at(1_000_000);
        assert_eq!(xform.host_to_ghost(1_000_000), 0);
    }

    #[test]
    fn host_ghost_round_trip() {
        let xform = GhostXForm { slope: 1.0003, intercept_micros: 42 };
        let host = 123_456_789i64;
        let ghost = xform.host_to_ghost(host);
        let back = xform.ghost_to_host(ghost);
        assert!((back - host).abs() <= 1);
    }
}
