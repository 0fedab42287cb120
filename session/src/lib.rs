mod options;
mod statistics;

pub use self::{
    options::{OptLevel, Passes, Session},
    statistics::{Statistic, StatisticsCollector, StatisticsError, Timer},
};
