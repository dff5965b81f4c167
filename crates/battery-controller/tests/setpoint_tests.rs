use battery_controller::{PowerLimits, PowerSetter, Setpoint, SetpointError};

fn setter() -> PowerSetter {
    PowerSetter::new(Setpoint::default(), PowerLimits::default())
}

#[test]
fn clamps_into_limits_and_truncates() {
    let power = setter();

    assert_eq!(power.set_power(6000.7), Ok(5_500));
    assert_eq!(power.setpoint().get(), 5_500);

    assert_eq!(power.set_power(-9999.0), Ok(-5_500));
    assert_eq!(power.setpoint().get(), -5_500);

    assert_eq!(power.set_power(100.9), Ok(100));
    assert_eq!(power.set_power(-100.9), Ok(-100));
    assert_eq!(power.setpoint().get(), -100);
}

#[test]
fn nan_is_rejected_and_keeps_previous_value() {
    let power = setter();
    power.set_power(1_200.0).expect("set");

    assert_eq!(power.set_power(f64::NAN), Err(SetpointError::NotFinite));
    assert_eq!(power.setpoint().get(), 1_200);
}

#[test]
fn infinities_clamp_to_limits() {
    let power = setter();
    assert_eq!(power.set_power(f64::INFINITY), Ok(5_500));
    assert_eq!(power.set_power(f64::NEG_INFINITY), Ok(-5_500));
}

#[test]
fn setpoint_is_shared_between_clones() {
    let setpoint = Setpoint::default();
    let power = PowerSetter::new(setpoint.clone(), PowerLimits { min_watts: -1_000, max_watts: 2_000 });

    power.set_power(2_500.0).expect("set");
    assert_eq!(setpoint.get(), 2_000);
    assert!(power.limits().contains(-1_000.0));
    assert!(!power.limits().contains(2_000.5));
}
