use strum::{Display, EnumIter};

/// Notifications a host can subscribe to.
#[derive(Display, EnumIter, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
pub enum Event {
    Stepped,
    SteppedInto,
    SteppedOut,
}

/// Debugger state at the moment an event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    pub event: Event,
    pub pc: u32,
    /// Call stack depth.
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Box<dyn FnMut(&StepInfo)>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Event, Listener)>,
}

impl Listeners {
    pub(crate) fn add(&mut self, event: Event, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, event, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let Some(index) = self.entries.iter().position(|(other, ..)| *other == id) else {
            return false;
        };
        self.entries.remove(index);
        true
    }

    pub(crate) fn emit(&mut self, info: StepInfo) {
        for (_, event, listener) in &mut self.entries {
            if *event == info.event {
                listener(&info);
            }
        }
    }
}
