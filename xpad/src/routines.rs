//! Manual test sequences run by the bench binaries.
//!
//! Each routine issues a short series of calls and stops at the first
//! failure, returning it to the caller for reporting.

use std::time::{Duration, Instant};

use tracing::info;

use crate::args::{LoadConfig, SaveConfigL};
use crate::detector::{LimaDetector, XpadDevice};
use crate::failure::DevResult;
use crate::poll::PollConfig;
use crate::proxy::DeviceProxy;

/// Outcome of [`snap_loop`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnapSummary {
    pub images: u32,
    pub elapsed: Duration,
    /// Frames the device reports for the last snap
    pub last_frame_count: u64,
}

/// Ping a device and format the line printed by the bench tools.
pub fn ping_report<P: DeviceProxy + ?Sized>(label: &str, proxy: &mut P) -> DevResult<String> {
    let rtt = proxy.ping()?;
    Ok(format!("-> ping({label})  {}  us", rtt.as_micros()))
}

/// Set the exposure once, then snap `iterations` single images, waiting for
/// the end of each acquisition.
pub fn snap_loop<P: DeviceProxy>(
    detector: &mut LimaDetector<P>,
    iterations: u32,
    exposure: Duration,
    poll: &PollConfig,
) -> DevResult<SnapSummary> {
    let start = Instant::now();
    detector.set_exposure_time(exposure)?;

    let mut last_frame_count = 0;
    for i in 1..=iterations {
        info!("Snaping image {} out of {}", i, iterations);
        detector.snap()?;
        detector.wait_end_acquisition(poll)?;
        last_frame_count = detector.acquired_frames()?;
    }

    Ok(SnapSummary {
        images: iterations,
        elapsed: start.elapsed(),
        last_frame_count,
    })
}

/// Save one DACL row into the detector RAM, then load the slot into the
/// chips.
pub fn save_dacl<P: DeviceProxy>(
    xpad: &mut XpadDevice<P>,
    row: &SaveConfigL,
    load: LoadConfig,
) -> DevResult<()> {
    xpad.save_config_l(row)?;
    xpad.load_config(load)?;
    info!("DACL row saved and loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{reasons, DevFailed};
    use crate::proxy::{DevState, DeviceData, DeviceName};

    /// Generic detector that runs for `busy_polls` state queries after each snap.
    struct FakeDetector {
        name: DeviceName,
        busy_polls: u32,
        remaining: u32,
        snaps: u32,
        log: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl FakeDetector {
        fn new(busy_polls: u32) -> Self {
            Self {
                name: "det/xpad/fake".parse().unwrap(),
                busy_polls,
                remaining: 0,
                snaps: 0,
                log: Vec::new(),
                fail_on: None,
            }
        }
    }

    impl DeviceProxy for FakeDetector {
        fn name(&self) -> &DeviceName {
            &self.name
        }

        fn ping(&mut self) -> DevResult<Duration> {
            Ok(Duration::from_micros(120))
        }

        fn state(&mut self) -> DevResult<DevState> {
            if self.remaining > 0 {
                self.remaining -= 1;
                Ok(DevState::Running)
            } else {
                Ok(DevState::Standby)
            }
        }

        fn status(&mut self) -> DevResult<String> {
            Ok(String::new())
        }

        fn read_attribute(&mut self, _name: &str) -> DevResult<DeviceData> {
            Ok(DeviceData::Long(1))
        }

        fn write_attribute(&mut self, name: &str, value: DeviceData) -> DevResult<()> {
            self.log.push(format!("write {name}={value:?}"));
            Ok(())
        }

        fn command_inout(&mut self, name: &str, _arg: DeviceData) -> DevResult<DeviceData> {
            if self.fail_on == Some(name) {
                return Err(DevFailed::new(reasons::HARDWARE_ERROR, "boom", "fake"));
            }
            self.log.push(format!("command {name}"));
            if name == "Snap" {
                self.snaps += 1;
                self.remaining = self.busy_polls;
            }
            Ok(DeviceData::Void)
        }
    }

    #[test]
    fn test_ping_report_format() {
        let mut det = FakeDetector::new(0);
        assert_eq!(
            ping_report("xpad_generic", &mut det).unwrap(),
            "-> ping(xpad_generic)  120  us"
        );
    }

    #[test]
    fn test_snap_loop_sets_exposure_once() {
        let mut det = LimaDetector::new(FakeDetector::new(3));
        let summary = snap_loop(&mut det, 4, Duration::from_millis(10), &PollConfig::default())
            .unwrap();

        assert_eq!(summary.images, 4);
        assert_eq!(summary.last_frame_count, 1);
        let fake = det.into_inner();
        assert_eq!(fake.snaps, 4);
        assert_eq!(
            fake.log.iter().filter(|l| l.starts_with("write")).count(),
            1
        );
    }

    #[test]
    fn test_snap_loop_stops_at_first_failure() {
        let mut fake = FakeDetector::new(0);
        fake.fail_on = Some("Snap");
        let mut det = LimaDetector::new(fake);

        let err = snap_loop(&mut det, 3, Duration::from_millis(1), &PollConfig::default())
            .unwrap_err();
        assert_eq!(err.reason(), Some(reasons::HARDWARE_ERROR));
    }

    #[test]
    fn test_save_dacl_skips_load_on_failure() {
        let mut fake = FakeDetector::new(0);
        fake.fail_on = Some("SaveConfigL");
        let mut xpad = XpadDevice::new(fake);

        let row = SaveConfigL::uniform(4, 0, 0, 0, 34);
        let load = LoadConfig {
            module: 4,
            calib_id: 0,
        };
        assert!(save_dacl(&mut xpad, &row, load).is_err());
        assert!(xpad.into_inner().log.is_empty());
    }
}
