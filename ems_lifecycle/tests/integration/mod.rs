mod agent;
mod bring_up;
mod phase_switch;
mod recovery;
mod supervision;
