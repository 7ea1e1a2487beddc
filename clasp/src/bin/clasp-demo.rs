//! Register a handful of options, parse the commandline, and print what was bound.
//!
//! Try `clasp-demo -xy --msg=hello -d /tmp -- -z rest`.

use clasp::Parser;

fn main() {
    let mut x = false;
    let mut y = false;
    let mut z = false;
    let mut msg = String::new();

    let (free, dir) = {
        let mut parser = Parser::from_env();
        parser.bool_var(&mut x, "-x", "--xxx");
        parser.bool_var(&mut y, "-y", "--yyy");
        parser.bool_var(&mut z, "-z", "--zzz");
        parser.string_var(&mut msg, "-m", "--msg");
        let dir = parser.string("-d", "--dir");
        let free = parser.parse();
        (free, parser.value(dir).to_string())
    };

    println!("x {}", x);
    println!("y {}", y);
    println!("z {}", z);
    println!("msg {}", msg);
    println!("dir {}", dir);
    println!("{:?}", free);
}
