type ChangeListener = Box<dyn FnMut(&str) + Send>;

/// The composer's input resource, owned for the composer's mounted
/// lifetime. Mirrors a rich-text editor instance: created on mount,
/// disabled while a send is in flight, disposed on unmount or remount.
/// Dispose detaches every listener and clears the backing buffer; a
/// disposed editor ignores all further calls.
pub struct Editor {
    contents: String,
    cursor: usize,
    enabled: bool,
    focused: bool,
    disposed: bool,
    listeners: Vec<ChangeListener>,
}

impl Editor {
    pub fn new() -> Self {
        Self {
            contents: String::new(),
            cursor: 0,
            enabled: true,
            focused: false,
            disposed: false,
            listeners: Vec::new(),
        }
    }

    pub fn focus(&mut self) {
        if !self.disposed {
            self.focused = true;
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn set_contents(&mut self, text: &str) {
        if self.disposed {
            return;
        }
        self.contents = text.to_string();
        self.cursor = self.contents.len();
        self.emit();
    }

    pub fn get_text(&self) -> &str {
        &self.contents
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if !self.disposed {
            self.enabled = enabled;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn on_change(&mut self, listener: impl FnMut(&str) + Send + 'static) {
        if !self.disposed {
            self.listeners.push(Box::new(listener));
        }
    }

    pub fn dispose(&mut self) {
        self.listeners.clear();
        self.contents.clear();
        self.cursor = 0;
        self.enabled = false;
        self.focused = false;
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn insert_char(&mut self, c: char) {
        if self.disposed || !self.enabled {
            return;
        }
        self.contents.insert(self.cursor, c);
        self.cursor += c.len_utf8();
        self.emit();
    }

    pub fn backspace(&mut self) {
        if self.disposed || !self.enabled || self.cursor == 0 {
            return;
        }
        let previous = self.previous_boundary();
        self.contents.replace_range(previous..self.cursor, "");
        self.cursor = previous;
        self.emit();
    }

    pub fn delete_forward(&mut self) {
        if self.disposed || !self.enabled || self.cursor >= self.contents.len() {
            return;
        }
        self.contents.remove(self.cursor);
        self.emit();
    }

    pub fn move_left(&mut self) {
        if self.cursor > 0 {
            self.cursor = self.previous_boundary();
        }
    }

    pub fn move_right(&mut self) {
        if let Some(c) = self.contents[self.cursor..].chars().next() {
            self.cursor += c.len_utf8();
        }
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.contents.len();
    }

    fn previous_boundary(&self) -> usize {
        self.contents[..self.cursor]
            .chars()
            .last()
            .map(|c| self.cursor - c.len_utf8())
            .unwrap_or(0)
    }

    fn emit(&mut self) {
        let text = self.contents.clone();
        for listener in &mut self.listeners {
            listener(&text);
        }
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn edits_move_the_cursor_and_notify_listeners() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut editor = Editor::new();
        editor.on_change(move |text| sink.lock().unwrap().push(text.to_string()));

        for c in "hey".chars() {
            editor.insert_char(c);
        }
        editor.backspace();
        assert_eq!(editor.get_text(), "he");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["h".to_string(), "he".into(), "hey".into(), "he".into()]
        );
    }

    #[test]
    fn cursor_respects_multibyte_boundaries() {
        let mut editor = Editor::new();
        editor.set_contents("héllo");
        editor.move_home();
        editor.move_right();
        editor.move_right();
        editor.backspace();
        assert_eq!(editor.get_text(), "hllo");
    }

    #[test]
    fn disabled_editor_rejects_input() {
        let mut editor = Editor::new();
        editor.set_enabled(false);
        editor.insert_char('x');
        assert_eq!(editor.get_text(), "");

        editor.set_enabled(true);
        editor.insert_char('x');
        assert_eq!(editor.get_text(), "x");
    }

    #[test]
    fn dispose_detaches_listeners_and_freezes_the_instance() {
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);

        let mut editor = Editor::new();
        editor.on_change(move |_| *sink.lock().unwrap() += 1);
        editor.insert_char('a');
        assert_eq!(*seen.lock().unwrap(), 1);

        editor.dispose();
        editor.set_contents("ignored");
        editor.insert_char('b');
        editor.set_enabled(true);
        assert!(editor.is_disposed());
        assert!(!editor.is_enabled());
        assert_eq!(editor.get_text(), "");
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
