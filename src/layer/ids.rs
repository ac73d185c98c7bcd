use super::LayerId;

/// TOML configuration store.
pub const CONFIG_STORE_LAYER: LayerId = LayerId::from_u128(0x8ceb_5811_4968_470f_8fc2_264767e0bbd9);

/// Volatile registry hive; values vanish at session end.
pub const REGISTRY_VOLATILE_LAYER: LayerId =
    LayerId::from_u128(0x8fc1_8e80_5ab3_4bb6_9b5d_4f41_ba1d_2ab0);

/// Non-volatile registry hive.
pub const REGISTRY_NONVOLATILE_LAYER: LayerId =
    LayerId::from_u128(0x8e29_561c_a0f0_4e89_a1ab_6ff4_3d26_e5e5);

/// Session-bus context broker.
pub const CONTEXT_BROKER_LAYER: LayerId =
    LayerId::from_u128(0x2c76_9b9e_d949_4cd1_848f_d32a_fcac_ea77);

/// JSON document service.
pub const DOCUMENT_STORE_LAYER: LayerId =
    LayerId::from_u128(0x6b1f_4df4_90ea_4d3c_b0c8_3e21_77a4_50f1);
