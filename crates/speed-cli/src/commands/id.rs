//! Id command implementation.

use anyhow::Result;

use speed_core::room::RoomGenerator;

use super::IdArgs;

/// Run the id command.
pub fn run(args: &IdArgs) -> Result<()> {
    let id = RoomGenerator::new().generate();

    if args.json {
        let output = serde_json::json!({ "room_id": id.as_str() });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{id}");
    }

    Ok(())
}
