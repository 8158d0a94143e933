use crate::client::{self, ClientId, CLOSE};
use crate::commands;
use crate::protocol;
use crate::repl;
use crate::server::{EventLoop, Server};
use std::rc::Rc;

/// The command carries its last argument as a length-prefixed bulk
/// payload.
pub const CMD_BULK: u8 = 1;
/// All arguments arrive on the inline line.
pub const CMD_INLINE: u8 = 2;

pub type CommandProc = fn(&mut EventLoop, &mut Server, ClientId);

pub struct Command {
    pub name: &'static str,
    pub proc: CommandProc,
    /// Exact argument count when positive; minimum count when negative.
    pub arity: i32,
    pub flags: u8,
}

impl Command {
    #[inline]
    pub fn is_bulk(&self) -> bool {
        self.flags & CMD_BULK != 0
    }
}

static COMMAND_TABLE: &[Command] = &[
    Command { name: "get", proc: commands::string::get, arity: 2, flags: CMD_INLINE },
    Command { name: "set", proc: commands::string::set, arity: 3, flags: CMD_BULK },
    Command { name: "setnx", proc: commands::string::setnx, arity: 3, flags: CMD_BULK },
    Command { name: "incr", proc: commands::string::incr, arity: 2, flags: CMD_INLINE },
    Command { name: "decr", proc: commands::string::decr, arity: 2, flags: CMD_INLINE },
    Command { name: "incrby", proc: commands::string::incrby, arity: 3, flags: CMD_INLINE },
    Command { name: "decrby", proc: commands::string::decrby, arity: 3, flags: CMD_INLINE },
    Command { name: "del", proc: commands::keyspace::del, arity: 2, flags: CMD_INLINE },
    Command { name: "exists", proc: commands::keyspace::exists, arity: 2, flags: CMD_INLINE },
    Command { name: "type", proc: commands::keyspace::type_, arity: 2, flags: CMD_INLINE },
    Command { name: "keys", proc: commands::keyspace::keys, arity: 2, flags: CMD_INLINE },
    Command { name: "randomkey", proc: commands::keyspace::randomkey, arity: 1, flags: CMD_INLINE },
    Command { name: "rename", proc: commands::keyspace::rename, arity: 3, flags: CMD_INLINE },
    Command { name: "renamenx", proc: commands::keyspace::renamenx, arity: 3, flags: CMD_INLINE },
    Command { name: "move", proc: commands::keyspace::move_, arity: 3, flags: CMD_INLINE },
    Command { name: "select", proc: commands::keyspace::select, arity: 2, flags: CMD_INLINE },
    Command { name: "dbsize", proc: commands::keyspace::dbsize, arity: 1, flags: CMD_INLINE },
    Command { name: "rpush", proc: commands::list::rpush, arity: 3, flags: CMD_BULK },
    Command { name: "lpush", proc: commands::list::lpush, arity: 3, flags: CMD_BULK },
    Command { name: "rpop", proc: commands::list::rpop, arity: 2, flags: CMD_INLINE },
    Command { name: "lpop", proc: commands::list::lpop, arity: 2, flags: CMD_INLINE },
    Command { name: "llen", proc: commands::list::llen, arity: 2, flags: CMD_INLINE },
    Command { name: "lindex", proc: commands::list::lindex, arity: 3, flags: CMD_INLINE },
    Command { name: "lset", proc: commands::list::lset, arity: 4, flags: CMD_BULK },
    Command { name: "lrange", proc: commands::list::lrange, arity: 4, flags: CMD_INLINE },
    Command { name: "ltrim", proc: commands::list::ltrim, arity: 4, flags: CMD_INLINE },
    Command { name: "lrem", proc: commands::list::lrem, arity: 4, flags: CMD_BULK },
    Command { name: "sadd", proc: commands::set::sadd, arity: 3, flags: CMD_BULK },
    Command { name: "srem", proc: commands::set::srem, arity: 3, flags: CMD_BULK },
    Command { name: "sismember", proc: commands::set::sismember, arity: 3, flags: CMD_BULK },
    Command { name: "scard", proc: commands::set::scard, arity: 2, flags: CMD_INLINE },
    Command { name: "smembers", proc: commands::set::smembers, arity: 2, flags: CMD_INLINE },
    Command { name: "ping", proc: commands::server::ping, arity: 1, flags: CMD_INLINE },
    Command { name: "echo", proc: commands::server::echo, arity: 2, flags: CMD_BULK },
    Command { name: "save", proc: commands::server::save, arity: 1, flags: CMD_INLINE },
    Command { name: "bgsave", proc: commands::server::bgsave, arity: 1, flags: CMD_INLINE },
    Command { name: "lastsave", proc: commands::server::lastsave, arity: 1, flags: CMD_INLINE },
    Command { name: "shutdown", proc: commands::server::shutdown, arity: 1, flags: CMD_INLINE },
    Command { name: "info", proc: commands::server::info, arity: 1, flags: CMD_INLINE },
    Command { name: "flushdb", proc: commands::server::flushdb, arity: 1, flags: CMD_INLINE },
    Command { name: "flushall", proc: commands::server::flushall, arity: 1, flags: CMD_INLINE },
    Command { name: "sync", proc: repl::sync, arity: 1, flags: CMD_INLINE },
];

pub fn lookup(name: &[u8]) -> Option<&'static Command> {
    COMMAND_TABLE
        .iter()
        .find(|command| command.name.as_bytes() == name)
}

/// Execute the parsed command sitting in the client's argv, or arm the
/// bulk-payload cursor when the last argument is still in flight. Returns
/// whether the client survived.
pub fn process_command(el: &mut EventLoop, srv: &mut Server, id: ClientId) -> bool {
    // quit cannot run as a regular handler: nothing may touch the session
    // afterwards.
    {
        let client = srv.client_mut(id);
        let lowered = Rc::new(client.argv[0].to_ascii_lowercase());
        client.argv[0] = lowered;
    }
    if srv.client(id).argv[0][..] == b"quit"[..] {
        client::free_client(el, srv, id);
        return false;
    }

    let command = match lookup(&srv.client(id).argv[0]) {
        Some(command) => command,
        None => {
            client::add_reply_bytes(el, srv, id, protocol::error("unknown command"));
            srv.client_mut(id).reset();
            return true;
        }
    };

    let argc = srv.client(id).argv.len() as i32;
    if (command.arity > 0 && command.arity != argc) || argc < -command.arity {
        client::add_reply_bytes(el, srv, id, protocol::error("wrong number of arguments"));
        srv.client_mut(id).reset();
        return true;
    }

    if command.is_bulk() && srv.client(id).bulklen == -1 {
        let count = {
            let client = srv.client_mut(id);
            let last = client.argv.pop().expect("arity checked above");
            protocol::atoi(&last)
        };
        if count < 0 || count > protocol::MAX_BULK_SIZE {
            client::add_reply_bytes(el, srv, id, protocol::error("invalid bulk write count"));
            srv.client_mut(id).reset();
            return true;
        }

        let client = srv.client_mut(id);
        client.bulklen = count + 2; // payload plus CRLF
        let needed = client.bulklen as usize;
        if client.querybuf.len() >= needed {
            // The payload is already buffered; consume it and fall through
            // to execution.
            let payload = client.querybuf[..needed - 2].to_vec();
            client.querybuf.drain(..needed);
            client.argv.push(Rc::new(payload));
        } else {
            // Suspend until the socket delivers the rest.
            return true;
        }
    }

    let dirty_before = srv.dirty;
    (command.proc)(el, srv, id);

    if srv.dirty > dirty_before && !srv.slaves.is_empty() {
        let db = srv.client(id).db;
        let argv = srv.client(id).argv.clone();
        repl::feed_slaves(el, srv, command, db, &argv);
    }
    srv.stat_numcommands += 1;

    if srv.client(id).has_flag(CLOSE) {
        client::free_client(el, srv, id);
        return false;
    }
    srv.client_mut(id).reset();
    true
}
