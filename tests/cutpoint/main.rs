mod control;
mod database;
mod errors;
mod helper;
mod interrupt;
mod properties;
