use core::fmt;

/// One sub-command of the station driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DriverCommand {
    Realtime,
    HighsLows,
    GetTime,
    SetTime,
    BacklightOn,
    BacklightOff,
    Model,
}

impl DriverCommand {
    pub const ALL: [DriverCommand; 7] = [
        DriverCommand::Realtime,
        DriverCommand::HighsLows,
        DriverCommand::GetTime,
        DriverCommand::SetTime,
        DriverCommand::BacklightOn,
        DriverCommand::BacklightOff,
        DriverCommand::Model,
    ];

    /// Command-line flag understood by `vproweather`.
    pub fn flag(self) -> &'static str {
        match self {
            DriverCommand::Realtime => "-x",
            DriverCommand::HighsLows => "-l",
            DriverCommand::GetTime => "--get-time",
            DriverCommand::SetTime => "--set-time",
            DriverCommand::BacklightOn => "--bklite-on",
            DriverCommand::BacklightOff => "--bklite-off",
            DriverCommand::Model => "--model",
        }
    }

    /// Backlight toggles are sent without a response delay.
    pub fn uses_delay(self) -> bool {
        !matches!(
            self,
            DriverCommand::BacklightOn | DriverCommand::BacklightOff
        )
    }

    /// Whether the command produces a telemetry payload on stdout.
    pub fn is_query(self) -> bool {
        self.sample_file().is_some()
    }

    /// File name of the pre-recorded payload used in sample mode.
    pub fn sample_file(self) -> Option<&'static str> {
        match self {
            DriverCommand::Realtime => Some("getRealtime.txt"),
            DriverCommand::HighsLows => Some("getHighLow.txt"),
            DriverCommand::GetTime => Some("getTime.txt"),
            DriverCommand::Model => Some("model.txt"),
            DriverCommand::SetTime | DriverCommand::BacklightOn | DriverCommand::BacklightOff => {
                None
            }
        }
    }
}

impl fmt::Display for DriverCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverCommand::Realtime => "realtime",
            DriverCommand::HighsLows => "highs-lows",
            DriverCommand::GetTime => "get-time",
            DriverCommand::SetTime => "set-time",
            DriverCommand::BacklightOn => "backlight-on",
            DriverCommand::BacklightOff => "backlight-off",
            DriverCommand::Model => "model",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortInfo {
    pub name: String,
    pub kind: String,
}
