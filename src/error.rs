use std::io;

use parser::ParseError;
use websocket::FrameError;

quick_error! {
    /// Connection-level error.
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        Parse(err: ParseError) {
            description("request parse error")
            display("request parse error: {}", err)
            from()
        }
        Websocket(err: FrameError) {
            description("websocket protocol error")
            display("websocket protocol error: {}", err)
            from()
        }
    }
}
