use crate::client::{self, ClientId};
use crate::object::{Blob, Value};
use crate::protocol;
use crate::server::{EventLoop, Server};
use std::collections::VecDeque;

enum Outcome {
    Done,
    Missing,
    WrongType,
}

pub fn lpush(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    push_generic(el, srv, id, true)
}

pub fn rpush(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    push_generic(el, srv, id, false)
}

fn push_generic(el: &mut EventLoop, srv: &mut Server, id: ClientId, head: bool) {
    let (dbi, key, element) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), c.argv[2].clone())
    };

    let outcome = match srv.dbs[dbi].find_mut(&key) {
        Some(Value::List(list)) => {
            if head {
                list.push_front(element.clone());
            } else {
                list.push_back(element.clone());
            }
            Outcome::Done
        }
        Some(_) => Outcome::WrongType,
        None => Outcome::Missing,
    };

    match outcome {
        Outcome::WrongType => {
            let error = srv.shared.wrongtype_err.clone();
            client::add_reply(el, srv, id, error);
            return;
        }
        Outcome::Missing => {
            let mut list = VecDeque::new();
            list.push_back(element);
            srv.dbs[dbi].replace(key, Value::List(list));
        }
        Outcome::Done => {}
    }

    srv.dirty += 1;
    let ok = srv.shared.ok.clone();
    client::add_reply(el, srv, id, ok);
}

pub fn llen(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };
    let length = match srv.dbs[dbi].find(&key) {
        None => Some(0),
        Some(Value::List(list)) => Some(list.len() as i64),
        Some(_) => None,
    };
    match length {
        Some(length) => client::add_reply_integer(el, srv, id, length),
        None => {
            let minus2 = srv.shared.minus2.clone();
            client::add_reply(el, srv, id, minus2);
        }
    }
}

pub fn lpop(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    pop_generic(el, srv, id, true)
}

pub fn rpop(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    pop_generic(el, srv, id, false)
}

fn pop_generic(el: &mut EventLoop, srv: &mut Server, id: ClientId, head: bool) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };

    enum Popped {
        Missing,
        WrongType,
        Empty,
        Element(Blob),
    }

    let popped = match srv.dbs[dbi].find_mut(&key) {
        None => Popped::Missing,
        Some(Value::List(list)) => {
            let element = if head { list.pop_front() } else { list.pop_back() };
            match element {
                Some(element) => Popped::Element(element),
                None => Popped::Empty,
            }
        }
        Some(_) => Popped::WrongType,
    };

    match popped {
        Popped::Missing | Popped::Empty => {
            let nil = srv.shared.nil.clone();
            client::add_reply(el, srv, id, nil);
        }
        Popped::WrongType => {
            let error = srv.shared.wrongtype_err_bulk.clone();
            client::add_reply(el, srv, id, error);
        }
        Popped::Element(element) => {
            srv.dirty += 1;
            client::add_reply_bulk(el, srv, id, element);
        }
    }
}

pub fn lindex(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, mut index) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), protocol::atoi(&c.argv[2]))
    };

    enum Found {
        Nil,
        WrongType,
        Element(Blob),
    }

    let found = match srv.dbs[dbi].find(&key) {
        None => Found::Nil,
        Some(Value::List(list)) => {
            if index < 0 {
                index += list.len() as i64;
            }
            if index < 0 || index as usize >= list.len() {
                Found::Nil
            } else {
                Found::Element(list[index as usize].clone())
            }
        }
        Some(_) => Found::WrongType,
    };

    match found {
        Found::Nil => {
            let nil = srv.shared.nil.clone();
            client::add_reply(el, srv, id, nil);
        }
        Found::WrongType => {
            let error = srv.shared.wrongtype_err_bulk.clone();
            client::add_reply(el, srv, id, error);
        }
        Found::Element(element) => client::add_reply_bulk(el, srv, id, element),
    }
}

pub fn lset(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, mut index, element) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), protocol::atoi(&c.argv[2]), c.argv[3].clone())
    };

    enum Set {
        Done,
        Missing,
        WrongType,
        OutOfRange,
    }

    let outcome = match srv.dbs[dbi].find_mut(&key) {
        None => Set::Missing,
        Some(Value::List(list)) => {
            if index < 0 {
                index += list.len() as i64;
            }
            if index < 0 || index as usize >= list.len() {
                Set::OutOfRange
            } else {
                list[index as usize] = element;
                Set::Done
            }
        }
        Some(_) => Set::WrongType,
    };

    match outcome {
        Set::Done => {
            srv.dirty += 1;
            let ok = srv.shared.ok.clone();
            client::add_reply(el, srv, id, ok);
        }
        Set::Missing => {
            let nokey = srv.shared.nokey_err.clone();
            client::add_reply(el, srv, id, nokey);
        }
        Set::WrongType => {
            let error = srv.shared.wrongtype_err.clone();
            client::add_reply(el, srv, id, error);
        }
        Set::OutOfRange => {
            client::add_reply_bytes(el, srv, id, protocol::error("index out of range"));
        }
    }
}

/// Clamp a possibly negative range onto a list of the given length.
/// Returns None when the range selects nothing.
fn clamp_range(mut start: i64, mut end: i64, len: i64) -> Option<(usize, usize)> {
    if start < 0 {
        start += len;
    }
    if end < 0 {
        end += len;
    }
    if start < 0 {
        start = 0;
    }
    if start > end || start >= len || len == 0 {
        return None;
    }
    if end >= len {
        end = len - 1;
    }
    Some((start as usize, end as usize))
}

pub fn lrange(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, start, end) = {
        let c = srv.client(id);
        (
            c.db,
            c.argv[1].clone(),
            protocol::atoi(&c.argv[2]),
            protocol::atoi(&c.argv[3]),
        )
    };

    enum Found {
        Missing,
        WrongType,
        Range(Vec<Blob>),
    }

    let found = match srv.dbs[dbi].find(&key) {
        None => Found::Missing,
        Some(Value::List(list)) => match clamp_range(start, end, list.len() as i64) {
            None => Found::Range(Vec::new()),
            Some((start, end)) => {
                Found::Range(list.iter().skip(start).take(end - start + 1).cloned().collect())
            }
        },
        Some(_) => Found::WrongType,
    };

    match found {
        Found::Missing => {
            let nil = srv.shared.nil.clone();
            client::add_reply(el, srv, id, nil);
        }
        Found::WrongType => {
            let error = srv.shared.wrongtype_err_bulk.clone();
            client::add_reply(el, srv, id, error);
        }
        Found::Range(elements) => {
            client::add_reply_bytes(el, srv, id, protocol::multibulk_header(elements.len() as i64));
            for element in elements {
                client::add_reply_bulk(el, srv, id, element);
            }
        }
    }
}

pub fn ltrim(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, start, end) = {
        let c = srv.client(id);
        (
            c.db,
            c.argv[1].clone(),
            protocol::atoi(&c.argv[2]),
            protocol::atoi(&c.argv[3]),
        )
    };

    let outcome = match srv.dbs[dbi].find_mut(&key) {
        None => Outcome::Missing,
        Some(Value::List(list)) => {
            match clamp_range(start, end, list.len() as i64) {
                None => list.clear(),
                Some((start, end)) => {
                    list.truncate(end + 1);
                    list.drain(..start);
                }
            }
            Outcome::Done
        }
        Some(_) => Outcome::WrongType,
    };

    match outcome {
        Outcome::Done => {
            srv.dirty += 1;
            let ok = srv.shared.ok.clone();
            client::add_reply(el, srv, id, ok);
        }
        Outcome::Missing => {
            client::add_reply_bytes(el, srv, id, protocol::error("no such key"));
        }
        Outcome::WrongType => {
            let error = srv.shared.wrongtype_err.clone();
            client::add_reply(el, srv, id, error);
        }
    }
}

pub fn lrem(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, count, target) = {
        let c = srv.client(id);
        (
            c.db,
            c.argv[1].clone(),
            protocol::atoi(&c.argv[2]),
            c.argv[3].clone(),
        )
    };

    let removed = match srv.dbs[dbi].find_mut(&key) {
        None => Some(0),
        Some(Value::List(list)) => {
            let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
            let mut removed = 0;
            if count >= 0 {
                let mut index = 0;
                while index < list.len() && removed < limit {
                    if *list[index] == *target {
                        let _ = list.remove(index);
                        removed += 1;
                    } else {
                        index += 1;
                    }
                }
            } else {
                let mut index = list.len();
                while index > 0 && removed < limit {
                    index -= 1;
                    if *list[index] == *target {
                        let _ = list.remove(index);
                        removed += 1;
                    }
                }
            }
            Some(removed as i64)
        }
        Some(_) => None,
    };

    match removed {
        Some(removed) => {
            if removed > 0 {
                srv.dirty += 1;
            }
            client::add_reply_integer(el, srv, id, removed);
        }
        None => {
            let minus2 = srv.shared.minus2.clone();
            client::add_reply(el, srv, id, minus2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(0, -1, 3), Some((0, 2)));
        assert_eq!(clamp_range(1, 1, 3), Some((1, 1)));
        assert_eq!(clamp_range(-2, -1, 3), Some((1, 2)));
        assert_eq!(clamp_range(2, 1, 3), None);
        assert_eq!(clamp_range(5, 9, 3), None);
        assert_eq!(clamp_range(0, 9, 3), Some((0, 2)));
        assert_eq!(clamp_range(0, 0, 0), None);
    }
}
