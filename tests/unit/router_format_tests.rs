use std::path::PathBuf;

use agent_bridge::router::{MessageRouter, CHAT_MESSAGE_PREFIX};

#[test]
fn plain_message_gets_prefix_and_session_suffix() {
    let text = MessageRouter::format_message("run the tests", &[], 2);
    assert_eq!(text, format!("{CHAT_MESSAGE_PREFIX}run the tests session=2"));
}

#[test]
fn slash_command_passes_through() {
    let text = MessageRouter::format_message("/compact", &[], 1);
    assert_eq!(text, "/compact session=1");
}

#[test]
fn attachments_follow_content() {
    let attachments = vec![
        PathBuf::from("/data/attachments/session_1/a.png"),
        PathBuf::from("/data/attachments/session_1/b.png"),
    ];
    let text = MessageRouter::format_message("look", &attachments, 1);
    assert_eq!(
        text,
        format!(
            "{CHAT_MESSAGE_PREFIX}look [attachment: /data/attachments/session_1/a.png] \
             [attachment: /data/attachments/session_1/b.png] session=1"
        )
    );
}
