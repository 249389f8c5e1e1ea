pub mod meter_readings;
