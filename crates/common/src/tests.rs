use super::*;

#[test]
fn default_config_is_valid() {
    assert!(TreeConfig::default().validate().is_ok());
}

#[test]
fn odd_limits_are_rejected() {
    let config = TreeConfig::builder().branch_factor(7).build();
    assert!(matches!(config.validate(), Err(IndexError::Config(_))));

    let config = TreeConfig::builder().leaf_capacity(2).build();
    assert!(matches!(config.validate(), Err(IndexError::Config(_))));
}

#[test]
fn floors_are_half_the_limits() {
    let config = TreeConfig::builder().branch_factor(6).leaf_capacity(10).build();
    assert_eq!(config.branch_floor(), 3);
    assert_eq!(config.leaf_floor(), 5);
}

#[test]
fn fixed_str_round_trips_and_orders() {
    let a: FixedStr<8> = "ab".parse().unwrap();
    let b: FixedStr<8> = "abc".parse().unwrap();
    assert_eq!(a.as_str(), "ab");
    assert!(a < b);
    assert!("toolongforslot".parse::<FixedStr<8>>().is_err());
}
