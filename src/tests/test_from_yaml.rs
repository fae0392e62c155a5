#[cfg(test)]
mod tests {
    use crate::config::CellConfig;
    use crate::config_error::ConfigError;
    use crate::timing::TorqueTier;
    use nalgebra::{Point2, Vector3};
    use std::time::Duration;

    const READ_ERROR: &'static str = "Failed to load cell configuration from file";

    #[test]
    fn test_cell_from_yaml() {
        let filename = "src/tests/data/desktop_cell.yaml";
        let loaded = CellConfig::from_yaml_file(filename).expect(READ_ERROR);
        let expected = CellConfig::default();

        for (l, e) in loaded.arm.chain.links.iter().zip(expected.arm.chain.links.iter()) {
            assert_eq!(l.a, e.a);
            assert_eq!(l.d, e.d);
            assert!((l.alpha - e.alpha).abs() < 1e-12, "{} {}", l.alpha, e.alpha);
            assert!((l.theta_offset - e.theta_offset).abs() < 1e-12);
        }
        for i in 0..6 {
            assert!((loaded.arm.constraints.from[i] - expected.arm.constraints.from[i]).abs() < 1e-12);
            assert!((loaded.arm.constraints.to[i] - expected.arm.constraints.to[i]).abs() < 1e-12);
        }

        assert_eq!(loaded.motion.drives[1].gear_ratio, 15.0);
        assert_eq!(loaded.motion.drives[2].tier, TorqueTier::Base);
        assert_eq!(loaded.motion.drives[3].tier, TorqueTier::Wrist);
        assert_eq!(loaded.motion.motor, expected.motion.motor);
        assert_eq!(loaded.motion.margin.factor, 1.5);
        assert_eq!(loaded.motion.margin.settle, 0.25);

        assert_eq!(loaded.vision.calibration_samples, 60);
        assert_eq!(loaded.vision.max_missed_frames, 15);
        assert_eq!(loaded.vision.reference_points[3], Point2::new(305.0, 0.0));
        assert_eq!(loaded.vision.retry_backoff, Duration::from_secs(2));
        assert_eq!(loaded.vision.debounce_tolerance, expected.vision.debounce_tolerance);

        assert_eq!(loaded.pick_place.grip_height, 30.0);
        assert_eq!(loaded.pick_place.lift_height, 100.0);
        assert_eq!(loaded.pick_place.drop_zone, Vector3::new(215.0, -240.0, 120.0));
        assert_eq!(loaded.pick_place.gripper_settle, Duration::from_millis(750));
        assert_eq!(loaded.pick_place.cooldown, Duration::from_secs(3));
        assert_eq!(loaded.pick_place.z_samples, expected.pick_place.z_samples);

        assert_eq!(loaded.link.port, "/dev/ttyUSB1");
        assert_eq!(loaded.link.baud_rate, 115200);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let loaded = CellConfig::from_yaml_str("{}").expect(READ_ERROR);
        let expected = CellConfig::default();
        assert_eq!(loaded.arm.chain, expected.arm.chain);
        assert_eq!(loaded.vision, expected.vision);
        assert_eq!(loaded.pick_place, expected.pick_place);
    }

    #[test]
    fn test_chain_yaml_reads_back() {
        let chain = CellConfig::default().arm.chain;
        let nested: Vec<String> = chain.to_yaml().lines().map(|l| format!("  {}", l)).collect();
        let yaml = format!("arm:\n{}\n", nested.join("\n"));
        let loaded = CellConfig::from_yaml_str(&yaml).expect(READ_ERROR);
        for (l, e) in loaded.arm.chain.links.iter().zip(chain.links.iter()) {
            assert_eq!(l.a, e.a);
            assert_eq!(l.d, e.d);
            assert!((l.alpha - e.alpha).abs() < 1e-6);
            assert!((l.theta_offset - e.theta_offset).abs() < 1e-6);
        }
    }

    #[test]
    fn test_short_chain_rejected() {
        let filename = "src/tests/data/short_chain.yaml";
        match CellConfig::from_yaml_file(filename) {
            Err(ConfigError::InvalidLength { field, expected, found }) => {
                assert_eq!(field, "arm.dh_chain");
                assert_eq!(expected, 6);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = CellConfig::from_yaml_file("src/tests/data/no_such_cell.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_invalid_values() {
        let yaml = "motion:\n  safety_factor: 0.5\n";
        assert!(matches!(CellConfig::from_yaml_str(yaml), Err(ConfigError::InvalidValue(_))));
        let yaml = "motion:\n  settle_time: -1.0\n";
        assert!(matches!(CellConfig::from_yaml_str(yaml), Err(ConfigError::InvalidValue(_))));
        let yaml = "motion:\n  motor:\n    power: 0.0\n";
        assert!(matches!(CellConfig::from_yaml_str(yaml), Err(ConfigError::InvalidValue(_))));
        let yaml = "pick_place:\n  cooldown: -1\n";
        assert!(matches!(CellConfig::from_yaml_str(yaml), Err(ConfigError::InvalidValue(_))));
        let yaml = "arm: [1, 2";
        assert!(matches!(CellConfig::from_yaml_str(yaml), Err(ConfigError::ParseError(_))));
    }
}
