//! Mode codes delivered by the wlmData callback (`cmi*` constants).
//!
//! Only the codes that are turned into [`DataPackage`](super::DataPackage)s
//! are listed. Channel-indexed codes are grouped into tables so that entry
//! `n - 1` belongs to channel `n`.

// State indicators (IntVal carries the value)
pub const RESULT_MODE: i32 = 1;
pub const RANGE: i32 = 2;
pub const PULSE_MODE: i32 = 3;
pub const WIDE_MODE: i32 = 4;
pub const FAST_MODE: i32 = 5;
pub const EXPOSURE_MODE: i32 = 6;
pub const REDUCED: i32 = 12;
pub const LINK: i32 = 15;
pub const OPERATION: i32 = 16;
pub const DISPLAY_MODE: i32 = 17;
pub const ANALYSIS_MODE: i32 = 32;
pub const SWITCHER_MODE: i32 = 124;
pub const SWITCHER_CHANNEL: i32 = 203;
pub const PID_COURSE: i32 = 1030;
pub const DEVIATION_SENSITIVITY_DIM: i32 = 1040;

// Server lifecycle
pub const DLL_DETACH: i32 = 30;
pub const DLL_ATTACH: i32 = 121;
pub const SERVER_INITIALIZED: i32 = 1124;

// Timestamped values (IntVal = timestamp, DblVal = value)
pub const TEMPERATURE: i32 = 14;
pub const LINEWIDTH: i32 = 44;
pub const ANALOG_IN: i32 = 66;
pub const ANALOG_OUT: i32 = 67;
pub const DISTANCE: i32 = 69;
pub const PID_T: i32 = 1033;
pub const PID_P: i32 = 1034;
pub const PID_I: i32 = 1035;
pub const PID_D: i32 = 1036;
pub const DEVIATION_SENSITIVITY_FACTOR: i32 = 1037;
pub const PID_DT: i32 = 1060;
pub const EXTERNAL_INPUT: i32 = 1400;
pub const PRESSURE: i32 = 1465;
pub const NOW_TICK: i32 = 1527;

/// Wavelength of channels 1..=17.
pub const WAVELENGTH: [i32; 17] = [
    42, 43, 90, 91, 92, 93, 94, 95, 1130, 1355, 1356, 1357, 1358, 1359, 1360, 1361, 1362,
];

/// Signal power of channels 1..=8.
pub const POWER: [i32; 8] = [267, 268, 269, 270, 271, 272, 273, 274];

/// Interference pattern minimum, indexed by `[ccd_array - 1][channel - 1]`.
pub const PATTERN_MIN: [[i32; 9]; 2] = [
    [22, 146, 147, 148, 149, 150, 151, 152, 1205],
    [24, 153, 154, 155, 156, 157, 158, 159, 1230],
];

/// Interference pattern maximum, indexed by `[ccd_array - 1][channel - 1]`.
pub const PATTERN_MAX: [[i32; 9]; 2] = [
    [23, 160, 161, 162, 163, 164, 165, 166, 1255],
    [25, 167, 168, 169, 170, 171, 172, 173, 1280],
];

/// Interference pattern average, indexed by `[ccd_array - 1][channel - 1]`.
pub const PATTERN_AVG: [[i32; 9]; 2] = [
    [140, 174, 175, 176, 177, 178, 179, 180, 1305],
    [141, 181, 182, 183, 184, 185, 186, 187, 1330],
];

/// Exposure value, indexed by `[ccd_array - 1][channel - 1]`.
pub const EXPOSURE: [[i32; 9]; 2] = [
    [7, 125, 126, 127, 128, 129, 130, 131, 1155],
    [8, 132, 133, 134, 135, 136, 137, 138, 1180],
];
