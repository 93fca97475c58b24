use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Chunked, Merged],
    events {
        chunk { transition: { from: Ready, to: Chunked } }
        merge { transition: { from: Chunked, to: Merged } }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
