//! MIDI input from external devices
//!
//! Incoming messages are translated to [`SynthCommand`]s inside the midir
//! callback and pushed onto the synth's bounded command queue. Nothing is
//! buffered here; when the queue is full the message is dropped.

use crate::error::{GrainError, GrainResult};
use crate::synth::{SynthCommand, MAX_PITCH_BEND};
use crossbeam::channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use tracing::{debug, info};

/// Controller number for "all notes off"
const CC_ALL_NOTES_OFF: u8 = 123;

/// Translate raw MIDI bytes into a synth command
///
/// Note on with velocity 0 counts as note off. Pitch bend maps the 14-bit
/// value onto +-[`MAX_PITCH_BEND`] semitones.
pub fn parse_message(bytes: &[u8]) -> Option<SynthCommand> {
    let (&status, data) = bytes.split_first()?;
    match (status & 0xF0, data) {
        (0x90, &[note, velocity, ..]) if velocity > 0 => Some(SynthCommand::NoteOn {
            note,
            velocity: velocity as f32 / 127.0,
        }),
        (0x90, &[note, _, ..]) | (0x80, &[note, _, ..]) => Some(SynthCommand::NoteOff { note }),
        (0xB0, &[CC_ALL_NOTES_OFF, _, ..]) => Some(SynthCommand::AllNotesOff),
        (0xE0, &[lsb, msb, ..]) => {
            let value = (((msb as i32) << 7) | lsb as i32) - 8192;
            Some(SynthCommand::PitchBend(value as f32 / 8192.0 * MAX_PITCH_BEND))
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct MidiInputDevice {
    pub name: String,
    pub index: usize,
}

#[derive(Default)]
pub struct MidiInputHandler {
    connection: Option<MidiInputConnection<()>>,
}

impl MidiInputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_devices() -> GrainResult<Vec<MidiInputDevice>> {
        let midi_in = MidiInput::new("grainbow scanner").map_err(|e| GrainError::Midi(e.to_string()))?;
        Ok(midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                midi_in
                    .port_name(port)
                    .ok()
                    .map(|name| MidiInputDevice { name, index })
            })
            .collect())
    }

    /// Connect to the first device whose name contains `device_name`
    pub fn connect(&mut self, device_name: &str, commands: Sender<SynthCommand>) -> GrainResult<()> {
        let midi_in = MidiInput::new("grainbow input").map_err(|e| GrainError::Midi(e.to_string()))?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).is_ok_and(|n| n.contains(device_name)))
            .ok_or_else(|| GrainError::Midi(format!("MIDI device '{}' not found", device_name)))?;
        self.connect_port(midi_in, port, commands)
    }

    pub fn connect_by_index(&mut self, index: usize, commands: Sender<SynthCommand>) -> GrainResult<()> {
        let midi_in = MidiInput::new("grainbow input").map_err(|e| GrainError::Midi(e.to_string()))?;
        let port = midi_in
            .ports()
            .get(index)
            .cloned()
            .ok_or_else(|| GrainError::Midi(format!("MIDI device index {} not found", index)))?;
        self.connect_port(midi_in, port, commands)
    }

    fn connect_port(
        &mut self,
        mut midi_in: MidiInput,
        port: MidiInputPort,
        commands: Sender<SynthCommand>,
    ) -> GrainResult<()> {
        let name = midi_in.port_name(&port).unwrap_or_else(|_| "unknown".to_string());
        midi_in.ignore(Ignore::Sysex | Ignore::Time);

        let connection = midi_in
            .connect(
                &port,
                "grainbow-input",
                move |_, message, _| {
                    if let Some(command) = parse_message(message) {
                        if commands.try_send(command).is_err() {
                            debug!("Command queue full, dropped {:?}", command);
                        }
                    }
                },
                (),
            )
            .map_err(|e| GrainError::Midi(e.to_string()))?;

        info!("Connected MIDI input: {}", name);
        self.connection = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_messages() {
        assert_eq!(
            parse_message(&[0x90, 60, 127]),
            Some(SynthCommand::NoteOn { note: 60, velocity: 1.0 })
        );
        assert_eq!(parse_message(&[0x93, 61, 0]), Some(SynthCommand::NoteOff { note: 61 }));
        assert_eq!(parse_message(&[0x80, 62, 40]), Some(SynthCommand::NoteOff { note: 62 }));
    }

    #[test]
    fn test_pitch_bend_range() {
        assert_eq!(parse_message(&[0xE0, 0x00, 0x40]), Some(SynthCommand::PitchBend(0.0)));
        assert_eq!(parse_message(&[0xE0, 0x00, 0x00]), Some(SynthCommand::PitchBend(-MAX_PITCH_BEND)));
        match parse_message(&[0xE0, 0x7F, 0x7F]) {
            Some(SynthCommand::PitchBend(v)) => assert!((v - MAX_PITCH_BEND).abs() < 1e-3, "got {}", v),
            other => panic!("expected pitch bend, got {:?}", other),
        }
    }

    #[test]
    fn test_ignored_messages() {
        assert_eq!(parse_message(&[]), None);
        assert_eq!(parse_message(&[0x90, 60]), None);
        assert_eq!(parse_message(&[0xB0, 1, 64]), None);
        assert_eq!(parse_message(&[0xB0, 123, 0]), Some(SynthCommand::AllNotesOff));
        assert_eq!(parse_message(&[0xF8]), None);
    }
}
