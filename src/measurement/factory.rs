use std::collections::HashMap;

use once_cell::sync::Lazy;
use thiserror::Error;

use super::mode;
use super::package::{
    DataPackage, Measurement, PatternStatistic, PidParameter, Quantity, RawEvent, Reading,
    ServerEvent, StateKind,
};

type PackageConstructor = Box<dyn Fn(&RawEvent) -> Measurement + Send + Sync>;

/// The callback delivered a mode code without a registered constructor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown measurement kind: {0}")]
pub struct UnknownMeasurementKind(pub i32);

static DATA_FACTORY: Lazy<DataFactory> = Lazy::new(DataFactory::new);

/// Process-wide factory, built on first use.
pub fn data_factory() -> &'static DataFactory {
    &DATA_FACTORY
}

/// Maps callback mode codes to [`DataPackage`] constructors.
pub struct DataFactory {
    constructors: HashMap<i32, PackageConstructor>,
}

impl Default for DataFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFactory {
    /// Create a factory with every known mode code registered.
    pub fn new() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };

        for (index, &code) in mode::WAVELENGTH.iter().enumerate() {
            let channel = index as u32 + 1;
            factory.register(code, move |raw| Measurement::Wavelength {
                channel,
                timestamp: raw.int_val,
                value: Reading::from(raw.double_val),
            });
        }

        for (index, &code) in mode::POWER.iter().enumerate() {
            let channel = index as u32 + 1;
            factory.register(code, move |raw| Measurement::Power {
                channel,
                value: Reading::from(raw.double_val),
            });
        }

        let scalars = [
            (mode::TEMPERATURE, Quantity::Temperature),
            (mode::NOW_TICK, Quantity::TimeTick),
            (mode::DISTANCE, Quantity::Distance),
            (mode::LINEWIDTH, Quantity::Linewidth),
            (mode::ANALOG_IN, Quantity::AnalogIn),
            (mode::ANALOG_OUT, Quantity::AnalogOut),
            (mode::EXTERNAL_INPUT, Quantity::ExternalInput),
            (
                mode::DEVIATION_SENSITIVITY_FACTOR,
                Quantity::DeviationSensitivityFactor,
            ),
        ];
        for (code, quantity) in scalars {
            factory.register(code, move |raw| Measurement::Scalar {
                quantity,
                timestamp: raw.int_val,
                value: Reading::from(raw.double_val),
            });
        }

        // Reported in hPa
        factory.register(mode::PRESSURE, |raw| Measurement::Scalar {
            quantity: Quantity::Pressure,
            timestamp: raw.int_val,
            value: Reading::from(raw.double_val * 100.0),
        });

        let pid = [
            (mode::PID_P, PidParameter::P),
            (mode::PID_I, PidParameter::I),
            (mode::PID_D, PidParameter::D),
            (mode::PID_T, PidParameter::T),
            (mode::PID_DT, PidParameter::Dt),
        ];
        for (code, parameter) in pid {
            factory.register(code, move |raw| Measurement::Pid {
                parameter,
                timestamp: raw.int_val,
                value: Reading::from(raw.double_val),
            });
        }

        let states = [
            (mode::RESULT_MODE, StateKind::ResultMode),
            (mode::RANGE, StateKind::Range),
            (mode::PULSE_MODE, StateKind::PulseMode),
            (mode::WIDE_MODE, StateKind::WideMode),
            (mode::FAST_MODE, StateKind::FastMode),
            (mode::EXPOSURE_MODE, StateKind::ExposureMode),
            (mode::REDUCED, StateKind::Reduced),
            (mode::LINK, StateKind::Link),
            (mode::OPERATION, StateKind::Operation),
            (mode::DISPLAY_MODE, StateKind::DisplayMode),
            (mode::ANALYSIS_MODE, StateKind::AnalysisMode),
            (mode::SWITCHER_MODE, StateKind::SwitcherMode),
            (mode::PID_COURSE, StateKind::PidCourse),
            (
                mode::DEVIATION_SENSITIVITY_DIM,
                StateKind::DeviationSensitivityDim,
            ),
        ];
        for (code, kind) in states {
            factory.register(code, move |raw| Measurement::State {
                kind,
                value: raw.int_val,
            });
        }

        factory.register(mode::SWITCHER_CHANNEL, |raw| {
            Measurement::SwitcherChannel {
                channel: u32::try_from(raw.int_val).unwrap_or(0),
            }
        });

        let patterns = [
            (&mode::PATTERN_MIN, PatternStatistic::Minimum),
            (&mode::PATTERN_MAX, PatternStatistic::Maximum),
            (&mode::PATTERN_AVG, PatternStatistic::Average),
            (&mode::EXPOSURE, PatternStatistic::Exposure),
        ];
        for (table, statistic) in patterns {
            for (ccd_index, codes) in table.iter().enumerate() {
                for (channel_index, &code) in codes.iter().enumerate() {
                    let ccd_array = ccd_index as u32 + 1;
                    let channel = channel_index as u32 + 1;
                    factory.register(code, move |raw| Measurement::Pattern {
                        statistic,
                        channel,
                        ccd_array,
                        value: raw.int_val,
                    });
                }
            }
        }

        let lifecycle = [
            (mode::DLL_ATTACH, ServerEvent::DllAttach),
            (mode::DLL_DETACH, ServerEvent::DllDetach),
            (mode::SERVER_INITIALIZED, ServerEvent::Initialized),
        ];
        for (code, event) in lifecycle {
            factory.register(code, move |_| Measurement::Server(event));
        }

        factory
    }

    fn register<F>(&mut self, mode: i32, constructor: F)
    where
        F: Fn(&RawEvent) -> Measurement + Send + Sync + 'static,
    {
        self.constructors.insert(mode, Box::new(constructor));
    }

    /// Build the package for a raw callback event.
    pub fn get(&self, raw: &RawEvent) -> Result<DataPackage, UnknownMeasurementKind> {
        let constructor = self
            .constructors
            .get(&raw.mode)
            .ok_or(UnknownMeasurementKind(raw.mode))?;

        Ok(DataPackage {
            product_id: raw.product_id,
            mode: raw.mode,
            measurement: constructor(raw),
        })
    }

    pub fn is_registered(&self, mode: i32) -> bool {
        self.constructors.contains_key(&mode)
    }

    /// Number of registered mode codes.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
